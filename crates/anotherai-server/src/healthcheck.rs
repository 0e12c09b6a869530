//! Periodic inference self-test.
//!
//! When `HEALTHCHECK_MODEL` is configured, the gateway runs a one-token
//! completion against it on an interval. The run goes through the normal
//! runner path (so provider selection, wire handling and completion
//! emission are all exercised) but is marked `preserve_credits`: the
//! upstream call costs money, the internal tenant is never debited and
//! the credit gate does not apply.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use anotherai::domain::{
    Agent, CacheUsage, CompletionSource, FallbackOption, Message, Role,
};
use anotherai::error::Result;
use anotherai::runner::{CompletionRequest, CompletionRunner, RunnerReply};

/// Tenant uid reserved for internal traffic.
pub const INTERNAL_TENANT_UID: i64 = 0;

const PROBE_INTERVAL: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// The non-billable probe request.
pub fn healthcheck_request(model: &str) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        messages: vec![Message::with_text(Role::User, "ping")],
        max_output_tokens: Some(1),
        use_cache: CacheUsage::Never,
        use_fallback: FallbackOption::Never,
        source: CompletionSource::Api,
        preserve_credits: Some(true),
        timeout: Some(PROBE_TIMEOUT),
        ..Default::default()
    }
}

/// Run one probe completion.
pub async fn run_once(runner: &CompletionRunner, model: &str) -> Result<()> {
    let agent = Agent {
        id: "healthcheck".into(),
        ..Default::default()
    };
    let reply = runner
        .run(INTERNAL_TENANT_UID, agent, healthcheck_request(model))
        .await?;
    if let RunnerReply::Completion(completion) = reply {
        info!(
            completion_id = %completion.id,
            model,
            "inference healthcheck succeeded"
        );
    }
    Ok(())
}

/// Probe on an interval until the process exits.
pub fn spawn(runner: Arc<CompletionRunner>, model: String) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_once(&runner, &model).await {
                warn!(error = %e, model, "inference healthcheck failed");
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_requests_are_non_billable() {
        let request = healthcheck_request("gpt-4.1-nano");
        assert!(request.non_billable());
        assert_eq!(request.preserve_credits, Some(true));
        assert_eq!(request.use_cache, CacheUsage::Never);
        assert_eq!(request.max_output_tokens, Some(1));
    }
}
