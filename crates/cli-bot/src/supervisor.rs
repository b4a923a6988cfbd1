use anyhow::Result;
use log::{info, warn};

use tubeconv::{JobHandle, Routed, Router, SessionAction, SessionCoordinator, SessionEvent};

use crate::jsonl::Connector;

/// Drive `connector` until the session stops, routing every inbound message
///
/// Returns the handles of all jobs admitted during the session.
pub async fn run_session<C: Connector>(connector: &mut C, router: &Router) -> Result<Vec<JobHandle>> {
    let mut coordinator = SessionCoordinator::new();
    let mut jobs = Vec::new();

    loop {
        let event = match connector.connect().await {
            Ok(()) => {
                coordinator.on_event(SessionEvent::Opened);
                loop {
                    match connector.next_message().await {
                        Ok(Some(message)) => {
                            if let Routed::Queued(handle) = router.handle(&message).await {
                                jobs.push(handle);
                            }
                        }
                        Ok(None) => {
                            info!("Input closed");
                            break SessionEvent::Closed { restartable: false };
                        }
                        Err(e) => {
                            warn!("Connection error: {:#}", e);
                            break SessionEvent::Closed { restartable: true };
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Failed to connect: {:#}", e);
                SessionEvent::Closed { restartable: true }
            }
        };

        match coordinator.on_event(event) {
            SessionAction::Stop => break,
            SessionAction::Reconnect(delay) => {
                tokio::time::sleep(delay).await;
                coordinator.on_event(SessionEvent::ReconnectStarted);
            }
            SessionAction::None => {}
        }
    }

    Ok(jobs)
}
