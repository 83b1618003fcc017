//! Property-based tests for subscription bookkeeping and dispatch order.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use typebus::{Event, EventBus, EventKind, SubscriptionHandle};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

struct Alpha;
impl Event for Alpha {}

struct Beta;
impl Event for Beta {}

#[derive(Debug, Clone)]
enum Op {
    /// Subscribe to Alpha (false) or Beta (true).
    Subscribe(bool),
    /// Unsubscribe the n-th handle issued so far, modulo the number issued.
    Unsubscribe(usize),
    PublishAlpha,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<bool>().prop_map(Op::Subscribe),
        2 => any::<usize>().prop_map(Op::Unsubscribe),
        1 => Just(Op::PublishAlpha),
    ]
}

/// Expected state: handles issued, with a tag and whether still live.
struct Model {
    issued: Vec<(SubscriptionHandle, usize, bool, bool)>,
}

impl Model {
    fn live_alpha_tags(&self) -> Vec<usize> {
        self.issued
            .iter()
            .filter(|(_, _, beta, live)| !beta && *live)
            .map(|(_, tag, _, _)| *tag)
            .collect()
    }

    fn live_count(&self, beta: bool) -> usize {
        self.issued
            .iter()
            .filter(|(_, _, b, live)| *b == beta && *live)
            .count()
    }
}

proptest! {
    #[test]
    fn test_registry_matches_model(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let bus = EventBus::new();
        let calls: Arc<Mutex<Vec<usize>>> = Arc::default();
        let mut model = Model { issued: Vec::new() };

        for op in ops {
            match op {
                Op::Subscribe(beta) => {
                    let tag = model.issued.len();
                    let handle = if beta {
                        bus.subscribe(|_: &Beta| Ok(()))
                    } else {
                        let calls = Arc::clone(&calls);
                        bus.subscribe(move |_: &Alpha| {
                            calls.lock().unwrap().push(tag);
                            Ok(())
                        })
                    };
                    model.issued.push((handle, tag, beta, true));
                }
                Op::Unsubscribe(n) => {
                    if model.issued.is_empty() {
                        continue;
                    }
                    let index = n % model.issued.len();
                    let entry = &mut model.issued[index];
                    let removed = bus.unsubscribe(&entry.0);
                    prop_assert_eq!(removed, entry.3);
                    entry.3 = false;
                }
                Op::PublishAlpha => {
                    calls.lock().unwrap().clear();
                    let outcome = bus.publish(Alpha).unwrap();
                    let expected = model.live_alpha_tags();
                    prop_assert_eq!(outcome.handlers(), expected.len());
                    prop_assert_eq!(&*calls.lock().unwrap(), &expected);
                }
            }

            prop_assert_eq!(bus.subscriber_count::<Alpha>(), model.live_count(false));
            prop_assert_eq!(bus.subscriber_count::<Beta>(), model.live_count(true));
            let expected_kinds = usize::from(model.live_count(false) > 0)
                + usize::from(model.live_count(true) > 0);
            prop_assert_eq!(bus.registry().kinds().len(), expected_kinds);
            prop_assert_eq!(
                bus.registry().len(),
                model.live_count(false) + model.live_count(true)
            );
            prop_assert_eq!(
                bus.registry().kinds().contains(&EventKind::of::<Alpha>()),
                model.live_count(false) > 0
            );
        }
    }

    #[test]
    fn test_fan_out_preserves_subscription_order(count in 1usize..40) {
        let bus = EventBus::new();
        let calls: Arc<Mutex<Vec<usize>>> = Arc::default();
        for tag in 0..count {
            let calls = Arc::clone(&calls);
            bus.subscribe(move |_: &Beta| {
                calls.lock().unwrap().push(tag);
                Ok(())
            });
        }

        bus.publish(Beta).unwrap();
        prop_assert_eq!(&*calls.lock().unwrap(), &(0..count).collect::<Vec<_>>());
    }
}
