//! Helper processors for composing chains

use async_trait::async_trait;
use voxflow_core::{unique_name, Frame, FrameDirection, FrameProcessor, ProcessorContext, Result};

/// Forwards every frame unchanged
pub struct PassthroughProcessor {
    name: String,
}

impl PassthroughProcessor {
    pub fn new() -> Self {
        Self::named(unique_name("Passthrough"))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for PassthroughProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameProcessor for PassthroughProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        ctx.push_frame(frame, direction);
        Ok(())
    }
}

/// Forwards only frames matching a predicate
///
/// Lifecycle frames never reach the predicate; they always pass.
pub struct FilterProcessor<F>
where
    F: Fn(&Frame) -> bool + Send + 'static,
{
    name: String,
    predicate: F,
}

impl<F> FilterProcessor<F>
where
    F: Fn(&Frame) -> bool + Send + 'static,
{
    pub fn new(predicate: F) -> Self {
        Self::named(unique_name("Filter"), predicate)
    }

    pub fn named(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

#[async_trait]
impl<F> FrameProcessor for FilterProcessor<F>
where
    F: Fn(&Frame) -> bool + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        if (self.predicate)(&frame) {
            ctx.push_frame(frame, direction);
        }
        Ok(())
    }
}

/// Transforms frames travelling downstream; upstream frames pass untouched
pub struct MapProcessor<F>
where
    F: Fn(Frame) -> Frame + Send + 'static,
{
    name: String,
    mapper: F,
}

impl<F> MapProcessor<F>
where
    F: Fn(Frame) -> Frame + Send + 'static,
{
    pub fn new(mapper: F) -> Self {
        Self::named(unique_name("Map"), mapper)
    }

    pub fn named(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
        }
    }
}

#[async_trait]
impl<F> FrameProcessor for MapProcessor<F>
where
    F: Fn(Frame) -> Frame + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        let frame = match direction {
            FrameDirection::Downstream => (self.mapper)(frame),
            FrameDirection::Upstream => frame,
        };
        ctx.push_frame(frame, direction);
        Ok(())
    }
}
