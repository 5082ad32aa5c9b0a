use criterion::measurement::WallTime;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use macsl::model_checking::generator::{random_markov_automaton, GeneratorSettings, RandomModel, REWARD_MODEL};
use macsl::{BoundedReachabilityTechnique, GeneralMinMaxSolverFactory, LraMethod, OptimizationDirection, Settings};

enum Size {
    SMALL,
    MEDIUM,
    LARGE,
}

fn setup(size: Size) -> RandomModel {
    let states = match size {
        Size::SMALL => 20,
        Size::MEDIUM => 100,
        Size::LARGE => 500,
    };
    let settings = GeneratorSettings { states, ..Default::default() };
    match random_markov_automaton(&settings, 42) {
        Ok(model) => model,
        Err(e) => panic!("could not generate benchmark model: {}", e),
    }
}

pub fn bounded_until_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let _ = env_logger::builder().is_test(true).try_init();
    let model = setup(Size::MEDIUM);
    let imca = Settings::default().with_precision(1e-3);
    let unif = imca.clone().with_technique(BoundedReachabilityTechnique::UnifPlus);
    let factory = GeneralMinMaxSolverFactory::new(&imca);

    c.bench_function("bounded until (digitization)", |b| {
        b.iter(|| {
            model.automaton.bounded_until(
                &imca,
                OptimizationDirection::Maximize,
                &model.goal_states,
                black_box((0.0, 1.0)),
                &factory,
            )
        })
    });
    c.bench_function("bounded until (UnifPlus)", |b| {
        b.iter(|| {
            model.automaton.bounded_until(
                &unif,
                OptimizationDirection::Maximize,
                &model.goal_states,
                black_box((0.0, 1.0)),
                &factory,
            )
        })
    })
}

pub fn long_run_average_benchmark(c: &mut Criterion) -> &mut Criterion<WallTime> {
    let model = setup(Size::LARGE);
    let small = setup(Size::SMALL);
    let lp = Settings::default();
    let vi = Settings::default().with_lra_method(LraMethod::ValueIteration);
    let factory = GeneralMinMaxSolverFactory::new(&lp);

    c.bench_function("long-run average (LP)", |b| {
        b.iter(|| model.automaton.long_run_average_rewards(&lp, OptimizationDirection::Maximize, REWARD_MODEL, &factory))
    });
    c.bench_function("long-run average (value iteration)", |b| {
        b.iter(|| small.automaton.long_run_average_rewards(&vi, OptimizationDirection::Maximize, REWARD_MODEL, &factory))
    })
}

criterion_group!(benches, bounded_until_benchmark, long_run_average_benchmark);
criterion_main!(benches);
