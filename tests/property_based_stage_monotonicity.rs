// Property-Based Testing for stage advancement
// Whatever the starting point, worker count or duplicate delivery rate, every
// poll converges on the final stage and no step ever runs twice or backwards.

mod fixtures;

use ballot_pipeline::model::Stage;
use fixtures::{seed, test_config, ElectionShape};
use proptest::prelude::*;
use proptest_derive::Arbitrary;

fn start_strategy() -> impl Strategy<Value = Option<Stage>> {
    prop_oneof![
        3 => Just(None),
        2 => (0..Stage::ALL.len()).prop_map(|i| Some(Stage::ALL[i])),
    ]
}

#[derive(Debug, Clone, Arbitrary)]
struct PipelineShape {
    #[proptest(strategy = "prop::collection::vec(start_strategy(), 0..5)")]
    starts: Vec<Option<Stage>>,
    #[proptest(strategy = "1usize..=4")]
    workers: usize,
    #[proptest(strategy = "prop_oneof![Just(0.0), Just(0.5), Just(1.0)]")]
    redelivery: f64,
    #[proptest(strategy = "0usize..=2")]
    local_trustees: usize,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn stages_only_move_forward_and_converge(shape in any::<PipelineShape>()) {
        let (finals, completed, over_run, re_run) = tokio_test::block_on(async {
            let mut config = test_config(shape.workers);
            config.queue.redelivery_probability = shape.redelivery;
            let layout = ElectionShape {
                polls: shape.starts.clone(),
                voters_per_poll: 0,
                local_trustees: shape.local_trustees,
                external_trustees: 0,
            };
            let seeded = seed(&config, &layout).await;
            seeded.pipeline.start(seeded.election.id).await.unwrap();
            seeded.pipeline.run_until_idle().await;

            let mut over_run = Vec::new();
            let mut re_run = Vec::new();
            for (poll, start) in seeded.polls.iter().zip(&shape.starts) {
                for stage in Stage::ALL {
                    let calls = seeded.pipeline.processor.call_count(poll.id, stage).await;
                    let already_done = start.is_some_and(|s| s >= stage);
                    let expected_max = if stage == Stage::PartiallyDecrypted {
                        shape.local_trustees
                    } else {
                        1
                    };
                    if already_done && calls > 0 {
                        re_run.push((poll.name.clone(), stage));
                    }
                    if calls > expected_max {
                        over_run.push((poll.name.clone(), stage, calls));
                    }
                }
            }

            (
                seeded.stages().await,
                seeded.election_state().await.is_completed(),
                over_run,
                re_run,
            )
        });

        prop_assert!(finals.iter().all(|s| *s == Some(Stage::ResultsComputed)), "{:?}", finals);
        prop_assert!(completed);
        prop_assert!(over_run.is_empty(), "steps ran too often: {:?}", over_run);
        prop_assert!(re_run.is_empty(), "completed steps ran again: {:?}", re_run);
    }
}
