// benches/bench_traffic_light_controller.rs
use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration,
};
use sam_grid_control::control_system::traffic_light_controller::{PhaseTimer, TrafficLightController};
use sam_grid_control::engine::scheduler::ManualScheduler;
use sam_grid_control::shared_data::LatLon;
use sam_grid_control::simulation_engine::intersections::IntersectionId;
use std::time::Duration;

// Engine with `size` staggered intersections on a virtual clock.
fn create_engine(
    size: usize,
) -> (TrafficLightController<ManualScheduler<PhaseTimer>>, ManualScheduler<PhaseTimer>) {
    let scheduler = ManualScheduler::new();
    let mut engine = TrafficLightController::new(scheduler.clone());
    for i in 0..size {
        let position = LatLon::new(45.40 + i as f64 * 1e-4, -75.70);
        engine.register(IntersectionId::from(i as u64), position, i);
    }
    (engine, scheduler)
}

fn bench_phase_transitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("phase_transitions");

    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &size in [50, 100, 200].iter() {
        group.bench_function(format!("size_{}", size), |b| {
            let (mut engine, scheduler) = create_engine(size);
            b.iter(|| {
                // Fire the next due transition; every firing re-arms one.
                if let Some((_, timer)) = scheduler.pop_next() {
                    black_box(engine.on_timer(&timer));
                }
            });
        });
    }
    group.finish();
}

fn bench_override_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("override_cycle");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));

    for &size in [50, 200].iter() {
        group.bench_function(format!("size_{}", size), |b| {
            let (mut engine, _scheduler) = create_engine(size);
            let mut next = 0usize;
            b.iter(|| {
                let id = IntersectionId::from((next % size) as u64);
                next += 1;
                let activation = engine.apply_override(&id, 15);
                black_box(engine.clear_override(&id, Some(activation)));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_phase_transitions, bench_override_cycle);
criterion_main!(benches);
