//! Transition resolution.

use crate::config::TransitionConfig;
use crate::context::Context;
use crate::engine::Machine;
use crate::error::EngineError;

/// Returns the first applicable transition.
///
/// Conditions are awaited one after another in declaration order; a
/// transition without a condition matches immediately and nothing after the
/// match is evaluated.
pub async fn resolve<'a>(
    transitions: &'a [TransitionConfig],
    ctx: &Context,
) -> Result<Option<&'a TransitionConfig>, EngineError> {
    for transition in transitions {
        match &transition.condition {
            None => return Ok(Some(transition)),
            Some(condition) => {
                if condition.call(ctx.clone()).await? {
                    return Ok(Some(transition));
                }
            }
        }
    }
    Ok(None)
}

impl Machine {
    /// Resolves the transition for `ctx.event()` in the current state.
    ///
    /// Event-specific transitions are tried before the any-event fallback.
    pub(crate) async fn resolve_for_event(
        &self,
        ctx: &Context,
    ) -> Result<Option<&TransitionConfig>, EngineError> {
        let Some(state) = self.current_state().active().cloned() else {
            return Ok(None);
        };
        let Some(config) = self.config().get_state(&state) else {
            return Ok(None);
        };

        if let Some(trigger) = ctx.event().and_then(|event| config.events.get(event)) {
            if let Some(transition) = resolve(&trigger.transitions, ctx).await? {
                return Ok(Some(transition));
            }
        }

        match &config.any_event_trigger {
            Some(trigger) => resolve(&trigger.transitions, ctx).await,
            None => Ok(None),
        }
    }
}
