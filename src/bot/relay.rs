use std::sync::Arc;

use crate::core::config::{AppConfig, BudgetConfig, HistoryConfig, StreamConfig, TextsConfig};
use crate::core::error::BotError;
use crate::core::message::{ContentPart, Message};
use crate::core::provider::{ChatBackend, ChatRequest};
use crate::core::session::{StreamHandle, UserId};
use crate::core::ui::{ChatId, ChatUi, MessageId, UiChannel};
use crate::core::usage::{PeriodKey, UsageStore};
use crate::stream::{
    relay_stream, InProgressMessage, LivePresenter, LoadingIndicator, Termination, ThrottlePolicy,
};

use super::store::SessionStore;

#[derive(Debug, Clone, Default)]
pub struct RelaySettings {
    pub history: HistoryConfig,
    pub stream: StreamConfig,
    pub budget: BudgetConfig,
    pub texts: TextsConfig,
}

impl From<&AppConfig> for RelaySettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            history: config.history.clone(),
            stream: config.stream.clone(),
            budget: config.budget.clone(),
            texts: config.texts.clone(),
        }
    }
}

/// One inbound user message.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub user_id: UserId,
    pub display_name: String,
    pub chat: ChatId,
    pub text: String,
    pub images: Vec<ContentPart>,
}

#[derive(Debug)]
pub struct TurnOutcome {
    pub reply: Message,
    pub termination: Termination,
    /// UI messages holding the final text, in order.
    pub delivered: Vec<MessageId>,
    pub cost: Option<f64>,
}

/// Returns the session to `Idle` however the turn ends.
struct ActiveStream {
    sessions: Arc<SessionStore>,
    user_id: UserId,
    handle: StreamHandle,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.sessions.finish_stream(self.user_id, &self.handle);
    }
}

/// Runs a user message through the backend and streams the reply into the UI.
pub struct ChatRelay {
    backend: Arc<dyn ChatBackend>,
    ui: Arc<dyn ChatUi>,
    sessions: Arc<SessionStore>,
    usage_store: Option<Arc<dyn UsageStore>>,
    settings: RelaySettings,
}

impl ChatRelay {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        ui: Arc<dyn ChatUi>,
        sessions: Arc<SessionStore>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            backend,
            ui,
            sessions,
            usage_store: None,
            settings,
        }
    }

    pub fn with_usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Stops the user's in-flight reply, if any.
    pub fn cancel(&self, user_id: UserId) -> bool {
        self.sessions.cancel_stream(user_id)
    }

    pub async fn handle_message(&self, incoming: IncomingMessage) -> Result<TurnOutcome, BotError> {
        let IncomingMessage {
            user_id,
            display_name,
            chat,
            text,
            images,
        } = incoming;
        let channel = UiChannel::new(Arc::clone(&self.ui), chat);
        let texts = &self.settings.texts;

        let (_, created) = self.sessions.get_or_create(user_id, &display_name);
        if created {
            self.load_usage(user_id).await;
        }

        let handle = match self.sessions.begin_stream(user_id) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::info!(%user_id, "Rejecting message while a reply is streaming");
                notify(&channel, &texts.busy).await;
                return Err(e.into());
            }
        };
        let _active = ActiveStream {
            sessions: Arc::clone(&self.sessions),
            user_id,
            handle: handle.clone(),
        };

        let history = &self.settings.history;
        if self
            .sessions
            .evict_if_stale(user_id, history.max_size, history.max_age_secs)?
        {
            tracing::info!(%user_id, "Conversation history reset");
        }
        self.sessions.touch_activity(user_id)?;

        if let Err(e) = self.check_budget(user_id) {
            notify(&channel, &texts.budget_exceeded).await;
            return Err(e);
        }

        let user_message = Message::new_user(text, images);
        let mut messages = self.sessions.history(user_id)?;
        messages.push(user_message.clone());
        let request = ChatRequest {
            system_prompt: self.sessions.system_prompt(user_id)?,
            messages,
        };

        tracing::info!(%user_id, history = request.messages.len(), "Starting reply");
        let loading =
            LoadingIndicator::start(channel.clone(), &texts.loading, self.settings.stream.loading_interval())
                .await?;

        let opened = tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => None,
            opened = self.backend.open_stream(&request) => Some(opened),
        };
        let source = match opened {
            Some(Ok(source)) => source,
            Some(Err(e)) => {
                tracing::error!(%user_id, error = %e, "Could not open completion stream");
                let message_id = loading.handoff().await;
                show(&channel, message_id, &texts.error).await;
                return Err(e.into());
            }
            None => {
                let message_id = loading.handoff().await;
                show(&channel, message_id, &texts.cancelled).await;
                return Err(BotError::Cancelled);
            }
        };

        let message_id = loading.handoff().await;
        let mut presenter = LivePresenter::new(
            channel,
            message_id,
            ThrottlePolicy::from(&self.settings.stream),
            self.settings.stream.message_limit,
        );

        let outcome = match relay_stream(source, &mut presenter, &handle.cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                presenter.fail(&texts.error).await;
                return Err(e.into());
            }
        };

        let placeholder = match outcome.termination {
            Termination::Completed => &texts.image_only,
            Termination::Cancelled => &texts.cancelled,
        };
        let delivered = presenter.finalize(&outcome.message.text, placeholder).await;

        let reply = Message::new_assistant(outcome.message.text.clone(), outcome.message.image_parts());
        if outcome.message.is_empty() && outcome.termination == Termination::Cancelled {
            tracing::debug!(%user_id, "Cancelled before any output; nothing recorded");
        } else {
            self.sessions
                .record_exchange(user_id, user_message, reply.clone())?;
        }

        let cost = self.settle_cost(user_id, &display_name, &outcome.message).await;
        let elapsed_ms = (chrono::Utc::now() - handle.started_at).num_milliseconds();
        tracing::info!(
            %user_id,
            elapsed_ms,
            chars = outcome.message.text.len(),
            images = outcome.message.images.len(),
            chunks = delivered.len(),
            cost,
            "Reply finished"
        );

        Ok(TurnOutcome {
            reply,
            termination: outcome.termination,
            delivered,
            cost,
        })
    }

    fn check_budget(&self, user_id: UserId) -> Result<(), BotError> {
        let Some(limit) = self.settings.budget.limit else {
            return Ok(());
        };
        let spent = self
            .sessions
            .usage(user_id)
            .map(|u| u.spent(self.settings.budget.period, &PeriodKey::today()))
            .unwrap_or(0.0);
        if spent >= limit {
            tracing::info!(%user_id, spent, limit, "Budget exhausted");
            return Err(BotError::BudgetExceeded { spent, limit });
        }
        Ok(())
    }

    async fn load_usage(&self, user_id: UserId) {
        let Some(store) = &self.usage_store else {
            return;
        };
        match store.load(user_id).await {
            Ok(Some(ledger)) => {
                if let Err(e) = self.sessions.set_usage(user_id, ledger) {
                    tracing::warn!(error = %e, "Could not attach stored usage");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(%user_id, error = %e, "Loading usage failed"),
        }
    }

    /// Books the turn's cost: the inline figure when the stream carried one,
    /// otherwise a lookup by generation id.
    async fn settle_cost(
        &self,
        user_id: UserId,
        display_name: &str,
        message: &InProgressMessage,
    ) -> Option<f64> {
        let cost = match (message.reported_cost, message.generation_id.as_deref()) {
            (Some(cost), _) => cost,
            (None, Some(id)) => match self.backend.generation_cost(id).await {
                Ok(cost) => cost,
                Err(e) => {
                    tracing::warn!(generation_id = id, error = %e, "Cost lookup failed");
                    return None;
                }
            },
            (None, None) => return None,
        };

        let ledger = match self.sessions.record_usage(user_id, cost, &PeriodKey::today()) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "Could not record usage");
                return Some(cost);
            }
        };
        if let Some(store) = &self.usage_store {
            if let Err(e) = store.save(user_id, display_name, &ledger).await {
                tracing::warn!(%user_id, error = %e, "Saving usage failed");
            }
        }
        Some(cost)
    }
}

async fn notify(channel: &UiChannel, text: &str) {
    if let Err(e) = channel.send(text).await {
        tracing::warn!(error = %e, "Could not deliver notice");
    }
}

async fn show(channel: &UiChannel, message_id: MessageId, text: &str) {
    if let Err(e) = channel.edit(message_id, text).await {
        tracing::warn!(error = %e, %message_id, "Could not update placeholder");
    }
}
