//! Interruption handler for barge-in
//!
//! Tracks whether the bot is speaking from the BotStarted/StoppedSpeaking
//! frames flowing past. When the run allows interruptions and the user
//! starts speaking over the bot, it pushes StartInterruption both ways so
//! every processor drops its in-flight bot output, and StopInterruption
//! once the user stops.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use voxflow_config::ServiceConfig;
use voxflow_core::{
    unique_name, Frame, FrameDirection, FrameKind, FrameProcessor, ProcessorContext, Result,
};

/// Interruption handler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptionConfig {
    /// User speech this soon after the bot started speaking is ignored
    pub grace_period: Duration,
}

impl From<&ServiceConfig> for InterruptionConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            grace_period: config.interruption_grace(),
        }
    }
}

/// Handler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerState {
    /// Bot silent
    Idle,
    /// Bot speaking since the given instant
    BotSpeaking(Instant),
    /// User cut in; waiting for them to stop
    Interrupted,
}

pub struct InterruptionHandler {
    name: String,
    config: InterruptionConfig,
    state: HandlerState,
}

impl InterruptionHandler {
    pub fn new(config: InterruptionConfig) -> Self {
        Self::named(unique_name("InterruptionHandler"), config)
    }

    pub fn named(name: impl Into<String>, config: InterruptionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: HandlerState::Idle,
        }
    }

    pub fn is_bot_speaking(&self) -> bool {
        matches!(self.state, HandlerState::BotSpeaking(_))
    }

    pub fn is_interrupted(&self) -> bool {
        self.state == HandlerState::Interrupted
    }

    fn handle_user_started(&mut self, ctx: &ProcessorContext) {
        let HandlerState::BotSpeaking(since) = self.state else {
            return;
        };

        if !ctx.params().allow_interruptions {
            tracing::trace!(processor = %self.name, "Interruptions disabled, ignoring user speech");
            return;
        }

        if since.elapsed() < self.config.grace_period {
            tracing::debug!(processor = %self.name, "User speech within grace period, ignoring");
            return;
        }

        tracing::info!(processor = %self.name, "User interrupted the bot");
        self.state = HandlerState::Interrupted;
        ctx.push_frame(Frame::new(FrameKind::StartInterruption), FrameDirection::Downstream);
        ctx.push_frame(Frame::new(FrameKind::StartInterruption), FrameDirection::Upstream);
    }

    fn handle_user_stopped(&mut self, ctx: &ProcessorContext) {
        if self.state != HandlerState::Interrupted {
            return;
        }
        self.state = HandlerState::Idle;
        ctx.push_frame(Frame::new(FrameKind::StopInterruption), FrameDirection::Downstream);
        ctx.push_frame(Frame::new(FrameKind::StopInterruption), FrameDirection::Upstream);
    }
}

impl Default for InterruptionHandler {
    fn default() -> Self {
        Self::new(InterruptionConfig::default())
    }
}

#[async_trait]
impl FrameProcessor for InterruptionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Interrupts bot output when the user speaks over it"
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        match frame.kind() {
            FrameKind::BotStartedSpeaking => {
                if !self.is_interrupted() {
                    self.state = HandlerState::BotSpeaking(Instant::now());
                }
                ctx.push_frame(frame, direction);
            }
            FrameKind::BotStoppedSpeaking => {
                if self.is_bot_speaking() {
                    self.state = HandlerState::Idle;
                }
                ctx.push_frame(frame, direction);
            }
            FrameKind::UserStartedSpeaking => {
                // The StartInterruption pushed next takes the system lane and overtakes this frame
                ctx.push_frame(frame, direction);
                self.handle_user_started(ctx);
            }
            FrameKind::UserStoppedSpeaking => {
                ctx.push_frame(frame, direction);
                self.handle_user_stopped(ctx);
            }
            _ => ctx.push_frame(frame, direction),
        }
        Ok(())
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.state = HandlerState::Idle;
        Ok(())
    }
}
