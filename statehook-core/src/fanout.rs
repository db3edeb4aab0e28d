//! Concurrent invocation of ordered handler lists.

use crate::error::EngineError;
use futures::future::{join_all, BoxFuture};
use serde_json::Value;

/// Runs every future concurrently and returns the settled results in input
/// order. A failing future does not stop the others.
pub async fn settle<T, I>(futures: I) -> Vec<Result<T, EngineError>>
where
    I: IntoIterator<Item = BoxFuture<'static, Result<T, EngineError>>>,
{
    join_all(futures).await
}

/// Runs every future concurrently; fails with the first error in input order
/// once all have settled.
pub async fn run_all<T, I>(futures: I) -> Result<Vec<T>, EngineError>
where
    I: IntoIterator<Item = BoxFuture<'static, Result<T, EngineError>>>,
{
    settle(futures).await.into_iter().collect()
}

/// Aggregates the replies of unhandled-event hooks.
///
/// Any failure wins over any value, and the earliest failure is reported.
/// `None` replies are ignored. Otherwise the first non-null value is the
/// resolution; `Ok(None)` means nobody resolved the event.
pub fn resolve_unhandled(
    replies: Vec<Result<Option<Value>, EngineError>>,
) -> Result<Option<Value>, EngineError> {
    let mut resolution = None;
    for reply in replies {
        match reply {
            Err(e) => return Err(e),
            Ok(Some(value)) if !value.is_null() && resolution.is_none() => {
                resolution = Some(value)
            }
            Ok(_) => {}
        }
    }
    Ok(resolution)
}

/// Shapes the results of a transition's actions into its return value.
pub fn collapse(mut results: Vec<Value>) -> Value {
    match results.len() {
        0 => Value::Null,
        1 => results.pop().unwrap_or(Value::Null),
        _ => Value::Array(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn delayed(ms: u64, out: Result<Value, EngineError>) -> BoxFuture<'static, Result<Value, EngineError>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            out
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_settle_preserves_input_order() {
        let results = settle(vec![
            delayed(20, Ok(json!("slow"))),
            delayed(0, Err(EngineError::handler("broken"))),
            delayed(5, Ok(json!("fast"))),
        ])
        .await;

        assert_eq!(results[0].as_ref().unwrap(), &json!("slow"));
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), &json!("fast"));
    }

    #[tokio::test]
    async fn test_run_all_reports_first_error_in_order() {
        let result = run_all(vec![
            delayed(0, Ok(json!(1))),
            delayed(20, Err(EngineError::handler("first"))),
            delayed(0, Err(EngineError::handler("second"))),
        ])
        .await;

        match result {
            Err(EngineError::Handler { message }) => assert_eq!(message, "first"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_failure_beats_earlier_value() {
        let result = resolve_unhandled(vec![
            Ok(Some(json!("handled"))),
            Err(EngineError::handler("hook 2")),
        ]);
        assert!(matches!(result, Err(EngineError::Handler { .. })));
    }

    #[test]
    fn test_ignored_and_null_replies_do_not_resolve() {
        assert!(resolve_unhandled(vec![]).unwrap().is_none());
        assert!(resolve_unhandled(vec![Ok(None), Ok(Some(Value::Null))])
            .unwrap()
            .is_none());
        assert_eq!(
            resolve_unhandled(vec![Ok(None), Ok(Some(json!(1))), Ok(Some(json!(2)))]).unwrap(),
            Some(json!(1))
        );
    }

    #[test]
    fn test_collapse() {
        assert_eq!(collapse(vec![]), Value::Null);
        assert_eq!(collapse(vec![json!(1)]), json!(1));
        assert_eq!(collapse(vec![json!(1), json!(2)]), json!([1, 2]));
    }

    fn reply_strategy() -> impl Strategy<Value = Option<Option<i64>>> {
        // None = failure, Some(None) = ignore, Some(Some(n)) = value
        prop_oneof![
            Just(None),
            Just(Some(None)),
            any::<i64>().prop_map(|n| Some(Some(n))),
        ]
    }

    proptest! {
        #[test]
        fn prop_resolution_policy(replies in proptest::collection::vec(reply_strategy(), 0..8)) {
            let input: Vec<_> = replies
                .iter()
                .enumerate()
                .map(|(i, r)| match r {
                    None => Err(EngineError::handler(i.to_string())),
                    Some(None) => Ok(None),
                    Some(Some(n)) => Ok(Some(json!(n))),
                })
                .collect();

            let first_failure = replies.iter().position(|r| r.is_none());
            let first_value = replies.iter().find_map(|r| r.and_then(|v| v));

            match (resolve_unhandled(input), first_failure) {
                (Err(EngineError::Handler { message }), Some(i)) => {
                    prop_assert_eq!(message, i.to_string())
                }
                (Ok(resolved), None) => prop_assert_eq!(resolved, first_value.map(|n| json!(n))),
                (other, _) => prop_assert!(false, "unexpected outcome {:?}", other),
            }
        }
    }
}
