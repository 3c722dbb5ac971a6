// amqp.rs
//
// AMQP transport for the agent mesh. amiquip is blocking, so the connection
// lives on a dedicated worker thread that forwards deliveries to the sink and
// takes subscribe/publish commands through a channel. The worker reconnects
// by itself until `disconnect` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use amiquip::{
    Connection, ConsumerMessage, ConsumerOptions, Exchange, ExchangeDeclareOptions, ExchangeType,
    FieldTable, Publish, QueueDeclareOptions, Result as AmiquipResult,
};
use rand::Rng;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::communication::bus::{BusEvent, BusEventSink, MessageBus};
use crate::config::BusConfig;
use crate::error::BusError;

// How long the worker blocks on the consumer before checking for commands.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

enum Command {
    Subscribe(String),
    Publish { topic: String, payload: Vec<u8> },
}

enum SessionEnd {
    Stopped,
    ConsumerEnded,
}

struct Worker {
    commands: UnboundedSender<Command>,
    stop: Arc<AtomicBool>,
}

pub struct AmqpBus {
    config: BusConfig,
    subscriptions: Vec<String>,
    connected: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl AmqpBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscriptions: Vec::new(),
            connected: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl MessageBus for AmqpBus {
    fn connect(&mut self, sink: BusEventSink) -> Result<(), BusError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (commands, command_rx) = unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let session = WorkerSession {
            config: self.config.clone(),
            subscriptions: self.subscriptions.clone(),
            commands: command_rx,
            stop: Arc::clone(&stop),
            connected: Arc::clone(&self.connected),
            sink,
            queue_name: format!("sam_dashboard_{:06x}", rand::rng().random::<u32>() & 0xff_ffff),
        };
        std::thread::spawn(move || session.run());
        self.worker = Some(Worker { commands, stop });
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<(), BusError> {
        if self.subscriptions.iter().any(|p| p == pattern) {
            return Ok(());
        }
        self.subscriptions.push(pattern.to_string());
        if let Some(worker) = &self.worker {
            worker
                .commands
                .send(Command::Subscribe(pattern.to_string()))
                .map_err(|_| BusError::NotConnected)?;
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let worker = self.worker.as_ref().ok_or(BusError::NotConnected)?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(BusError::NotConnected);
        }
        worker
            .commands
            .send(Command::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            })
            .map_err(|_| BusError::NotConnected)
    }

    fn disconnect(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
        }
        self.subscriptions.clear();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for AmqpBus {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct WorkerSession {
    config: BusConfig,
    subscriptions: Vec<String>,
    commands: UnboundedReceiver<Command>,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    sink: BusEventSink,
    queue_name: String,
}

impl WorkerSession {
    fn run(mut self) {
        while !self.stopped() {
            match self.session() {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::ConsumerEnded) => log::warn!("mesh consumer ended, reconnecting"),
                Err(e) => log::warn!("mesh connection to {} failed: {}", self.config.amqp_url, e),
            }
            self.mark_disconnected();
            self.wait_before_reconnect();
        }
        self.mark_disconnected();
        log::info!("mesh worker stopped");
    }

    fn session(&mut self) -> AmiquipResult<SessionEnd> {
        let mut connection = Connection::insecure_open(&self.config.amqp_url)?;
        let channel = connection.open_channel(None)?;
        let exchange = channel.exchange_declare(
            ExchangeType::Topic,
            self.config.exchange.as_str(),
            ExchangeDeclareOptions::default(),
        )?;
        let queue = channel.queue_declare(
            self.queue_name.as_str(),
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueDeclareOptions::default()
            },
        )?;
        for key in &self.subscriptions {
            queue.bind(&exchange, key.as_str(), FieldTable::new())?;
        }
        let consumer = queue.consume(ConsumerOptions {
            no_ack: true,
            ..ConsumerOptions::default()
        })?;

        self.connected.store(true, Ordering::SeqCst);
        log::info!("connected to mesh exchange '{}'", self.config.exchange);
        (self.sink)(BusEvent::Connected);

        let end = loop {
            if self.stopped() {
                break SessionEnd::Stopped;
            }
            while let Ok(command) = self.commands.try_recv() {
                match command {
                    Command::Subscribe(key) => {
                        queue.bind(&exchange, key.as_str(), FieldTable::new())?;
                        self.subscriptions.push(key);
                    }
                    Command::Publish { topic, payload } => publish(&exchange, &topic, &payload)?,
                }
            }
            match consumer.receiver().recv_timeout(POLL_INTERVAL) {
                Ok(ConsumerMessage::Delivery(delivery)) => (self.sink)(BusEvent::Message {
                    topic: delivery.routing_key.clone(),
                    payload: delivery.body,
                }),
                Ok(other) => {
                    log::warn!("mesh consumer ended: {:?}", other);
                    break SessionEnd::ConsumerEnded;
                }
                Err(e) if e.is_timeout() => {}
                Err(_) => break SessionEnd::ConsumerEnded,
            }
        };
        connection.close()?;
        Ok(end)
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            (self.sink)(BusEvent::Disconnected);
        }
    }

    fn wait_before_reconnect(&self) {
        let mut waited = Duration::ZERO;
        while waited < self.config.reconnect_period && !self.stopped() {
            std::thread::sleep(POLL_INTERVAL);
            waited += POLL_INTERVAL;
        }
    }
}

fn publish(exchange: &Exchange, topic: &str, payload: &[u8]) -> AmiquipResult<()> {
    exchange.publish(Publish::new(payload, topic))
}

/// Opens a short-lived connection, publishes one message to the mesh
/// exchange and closes again.
pub fn publish_once(config: &BusConfig, topic: &str, payload: &[u8]) -> Result<(), BusError> {
    let mut connection = Connection::insecure_open(&config.amqp_url)?;
    let channel = connection.open_channel(None)?;
    let exchange = channel.exchange_declare(
        ExchangeType::Topic,
        config.exchange.as_str(),
        ExchangeDeclareOptions::default(),
    )?;
    publish(&exchange, topic, payload)?;
    connection.close()?;
    Ok(())
}
