//! Bootstrap listener: READY handshake and inbound message dispatch.

use crate::error::{BootstrapError, SessionError};
use crate::session::{SessionController, SessionInfo};
use crate::wire::{OFFLINE_TOKEN, READY_TOKEN};

use edgetwin_env::{Message, Publisher, Subscriber, TransportError, TwinContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of dispatching one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A bootstrap was accepted and the session started
    Started(SessionInfo),

    /// A bootstrap was rejected (invalid or duplicate)
    BootstrapRejected(BootstrapError),

    /// A drug command was applied to this many sites
    Dosed(usize),

    /// A drug command was rejected
    CommandRejected(SessionError),

    /// The message arrived on a channel the node does not handle
    Ignored,
}

/// Connects a subscriber to a [`SessionController`].
///
/// # Handshake
///
/// ```text
/// Edge node                        Broker                  Physical twin
///   |-- subscribe(bootstrap) ------>|                          |
///   |-- publish_retained(READY) --->|                          |
///   |                               |<-- subscribe(status) ----|
///   |                               |-- READY (retained) ----->|
///   |                               |<-- bootstrap payload ----|
///   |<-- bootstrap payload ---------|                          |
/// ```
///
/// The subscription is in place before READY is announced, so a twin that
/// reacts to READY immediately cannot publish into the void.
pub struct BootstrapListener<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    controller: Arc<SessionController<Ctx, P>>,
}

impl<Ctx, P> BootstrapListener<Ctx, P>
where
    Ctx: TwinContext,
    P: Publisher,
{
    pub fn new(controller: Arc<SessionController<Ctx, P>>) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &Arc<SessionController<Ctx, P>> {
        &self.controller
    }

    /// Publishes the retained READY token on the status channel.
    pub async fn announce_ready(&self) -> Result<(), TransportError> {
        self.announce(READY_TOKEN).await
    }

    /// Publishes the retained OFFLINE token on the status channel.
    pub async fn announce_offline(&self) -> Result<(), TransportError> {
        self.announce(OFFLINE_TOKEN).await
    }

    async fn announce(&self, token: &str) -> Result<(), TransportError> {
        let channel = &self.controller.config().channels.status;
        self.controller
            .publisher()
            .publish_retained(channel, token.as_bytes().to_vec())
            .await?;
        info!("📡 Announced {} on '{}'", token, channel);
        Ok(())
    }

    /// Routes one message to the controller.
    pub fn dispatch(&self, message: &Message) -> Dispatch {
        let channels = &self.controller.config().channels;

        if message.channel == channels.bootstrap {
            match self.controller.on_bootstrap(&message.payload) {
                Ok(info) => Dispatch::Started(info),
                Err(e) => Dispatch::BootstrapRejected(e),
            }
        } else if message.channel == channels.drug {
            match self.controller.on_drug_command(&message.payload) {
                Ok(sites) => Dispatch::Dosed(sites),
                Err(e) => {
                    warn!("Rejected drug command: {}", e);
                    Dispatch::CommandRejected(e)
                }
            }
        } else {
            debug!("Ignoring message on '{}'", message.channel);
            Dispatch::Ignored
        }
    }

    /// Subscribes, announces READY and dispatches messages until the session
    /// is shut down or the subscriber closes.
    pub async fn run<S: Subscriber>(&self, subscriber: &S) -> Result<(), TransportError> {
        let channels = self.controller.config().channels.clone();
        subscriber.subscribe(&channels.bootstrap).await?;
        subscriber.subscribe(&channels.drug).await?;
        self.announce_ready().await?;
        info!("Listening for bootstrap on '{}'", channels.bootstrap);

        let stop = self.controller.stop_signal();
        loop {
            tokio::select! {
                biased;

                _ = stop.stopped() => {
                    debug!("Listener stopping: session shut down");
                    break;
                }
                message = subscriber.recv() => match message {
                    Some(message) => {
                        self.dispatch(&message);
                    }
                    None => {
                        info!("Subscriber closed; listener exiting");
                        break;
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use crate::config::EdgeConfig;
    use crate::session::Phase;
    use crate::testing::{RecordingPublisher, ScriptedSubscriber};
    use edgetwin_env::TokioContext;
    use std::time::Duration;

    const STATUS: &str = "digitaltwin/system/status";
    const BOOTSTRAP: &str = "digitaltwin/breast/bootstrap";
    const DRUG: &str = "digitaltwin/breast/drug";

    fn listener() -> (
        Arc<BootstrapListener<TokioContext, RecordingPublisher>>,
        Arc<RecordingPublisher>,
    ) {
        let publisher = Arc::new(RecordingPublisher::new());
        let controller = SessionController::new(
            Arc::new(TokioContext::with_seed(3)),
            publisher.clone(),
            EdgeConfig::default(),
        )
        .unwrap();
        (Arc::new(BootstrapListener::new(Arc::new(controller))), publisher)
    }

    #[tokio::test]
    async fn test_announce_ready_is_retained_and_repeatable() {
        let (listener, publisher) = listener();

        listener.announce_ready().await.unwrap();
        listener.announce_ready().await.unwrap();

        let status = publisher.sent_on(STATUS);
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|m| m.retained && m.text() == Some("READY")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_routes_by_channel() {
        let (listener, _) = listener();

        let rejected = listener.dispatch(&Message::new(BOOTSTRAP, b"{}".to_vec()));
        assert_eq!(
            rejected,
            Dispatch::BootstrapRejected(BootstrapError::MissingField("patient_id"))
        );

        let started = listener.dispatch(&Message::new(
            BOOTSTRAP,
            br#"{"patient_id": "P-9", "risk_factors": {"genetic": 0.2}}"#.to_vec(),
        ));
        assert!(matches!(started, Dispatch::Started(ref info) if info.patient_id == "P-9"));

        let duplicate = listener.dispatch(&Message::new(
            BOOTSTRAP,
            br#"{"patient_id": "P-10", "risk_factors": {"genetic": 0.2}}"#.to_vec(),
        ));
        assert_eq!(
            duplicate,
            Dispatch::BootstrapRejected(BootstrapError::DuplicateSession(Phase::Running))
        );

        let dosed = listener.dispatch(&Message::new(DRUG, br#"{"efficacy": 1.0}"#.to_vec()));
        assert_eq!(dosed, Dispatch::Dosed(2));

        let bad = listener.dispatch(&Message::new(DRUG, br#"{"efficacy": 1.0, "site": "x"}"#.to_vec()));
        assert_eq!(bad, Dispatch::CommandRejected(SessionError::UnknownSite("x".into())));

        assert_eq!(
            listener.dispatch(&Message::new("somewhere/else", b"hi".to_vec())),
            Dispatch::Ignored
        );
        listener.controller().shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_handshake_then_bootstrap() {
        let (listener, publisher) = listener();
        let (subscriber, feed) = ScriptedSubscriber::new();
        let subscriber = Arc::new(subscriber);

        feed.send(Message::new(BOOTSTRAP, b"garbage".to_vec())).unwrap();
        feed.send(Message::new(
            BOOTSTRAP,
            br#"{"meta": {"patient_id": "P-1"}, "config": {"risk_factors": {"genetic": 0.05}}}"#.to_vec(),
        ))
        .unwrap();
        feed.send(Message::new(DRUG, br#"{"efficacy": 0.5, "site": "left"}"#.to_vec()))
            .unwrap();

        let task = {
            let listener = Arc::clone(&listener);
            let subscriber = Arc::clone(&subscriber);
            tokio::spawn(async move { listener.run(subscriber.as_ref()).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;

        let controller = listener.controller();
        assert_eq!(subscriber.subscriptions(), vec![BOOTSTRAP.to_string(), DRUG.to_string()]);
        assert_eq!(publisher.sent_on(STATUS)[0].text(), Some("READY"));
        assert_eq!(controller.phase(), Phase::Running);
        assert_eq!(controller.session().unwrap().patient_id, "P-1");
        // dosed at t=0, then decayed by the ticks since
        let level = controller.model_states()["left"].drug_efficacy;
        assert!(level < 0.5);
        assert_abs_diff_eq!(level, 0.5, epsilon = 0.01);
        assert_eq!(controller.model_states()["right"].drug_efficacy, 0.0);
        assert!(!publisher.sent_on("digitaltwin/breast/tumor").is_empty());

        controller.shutdown();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_when_subscriber_closes() {
        let (listener, _) = listener();
        let (subscriber, feed) = ScriptedSubscriber::new();
        drop(feed);

        listener.run(&subscriber).await.unwrap();
        assert_eq!(listener.controller().phase(), Phase::Idle);
    }
}
