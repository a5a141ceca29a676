//! Ordered processor chains
//!
//! A [`Pipeline`] owns its processors and fixes their neighbor links at
//! construction: processor `i` sends downstream to `i + 1` and upstream to
//! `i - 1`. Links never change afterwards. Nested pipelines are flattened
//! into the outer chain, so a nested pipeline's input and output become
//! ordinary links of the outer one.

use std::collections::HashSet;
use std::fmt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voxflow_core::{frame_channel, FrameProcessor, FrameSender, Observers, ProcessorContext};

use crate::driver::run_processor;
use crate::PipelineError;

/// A linear chain of processors
pub struct Pipeline {
    name: String,
    processors: Vec<Box<dyn FrameProcessor>>,
}

impl Pipeline {
    /// Create using the builder
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Always false: construction rejects empty chains
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// First processor, target of externally pushed downstream frames
    pub fn input(&self) -> ProcessorRef<'_> {
        ProcessorRef {
            pipeline: self,
            index: 0,
        }
    }

    /// Last processor, target of externally pushed upstream frames
    pub fn output(&self) -> ProcessorRef<'_> {
        ProcessorRef {
            pipeline: self,
            index: self.processors.len() - 1,
        }
    }

    /// Processor names in downstream order
    pub fn processor_names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Look up a processor by name
    pub fn get(&self, name: &str) -> Option<ProcessorRef<'_>> {
        self.processors
            .iter()
            .position(|p| p.name() == name)
            .map(|index| ProcessorRef {
                pipeline: self,
                index,
            })
    }

    /// Spawn one task per processor, wired to the given boundaries
    ///
    /// Frames leaving the output downstream go to `downstream_boundary`;
    /// frames leaving the input upstream go to `upstream_boundary`, which
    /// also receives errors from processors whose upstream neighbor has
    /// already stopped.
    pub(crate) fn spawn(
        self,
        downstream_boundary: FrameSender,
        upstream_boundary: FrameSender,
        cancel: CancellationToken,
        observers: Observers,
    ) -> RunningPipeline {
        let (senders, receivers): (Vec<_>, Vec<_>) = self
            .processors
            .iter()
            .map(|p| frame_channel(p.name()))
            .unzip();

        let last = self.processors.len() - 1;
        let mut handles = Vec::with_capacity(self.processors.len());

        for (index, (processor, inbox)) in self.processors.into_iter().zip(receivers).enumerate() {
            let downstream = if index == last {
                downstream_boundary.clone()
            } else {
                senders[index + 1].clone()
            };
            let upstream = if index == 0 {
                upstream_boundary.clone()
            } else {
                senders[index - 1].clone()
            };

            let ctx = ProcessorContext::new(
                processor.name(),
                Some(downstream),
                Some(upstream),
                cancel.clone(),
                observers.clone(),
            )
            .with_boundary(Some(upstream_boundary.clone()));

            handles.push(tokio::spawn(run_processor(processor, inbox, ctx)));
        }

        tracing::debug!(pipeline = %self.name, processors = handles.len(), "Pipeline spawned");

        RunningPipeline {
            input: senders[0].clone(),
            output: senders[last].clone(),
            handles,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("processors", &self.processor_names())
            .finish()
    }
}

/// Position of a processor inside a pipeline, for walking the links
#[derive(Clone, Copy)]
pub struct ProcessorRef<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> ProcessorRef<'a> {
    pub fn name(&self) -> &'a str {
        self.pipeline.processors[self.index].name()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Downstream neighbor
    pub fn next(&self) -> Option<ProcessorRef<'a>> {
        (self.index + 1 < self.pipeline.processors.len()).then(|| ProcessorRef {
            pipeline: self.pipeline,
            index: self.index + 1,
        })
    }

    /// Upstream neighbor
    pub fn previous(&self) -> Option<ProcessorRef<'a>> {
        self.index.checked_sub(1).map(|index| ProcessorRef {
            pipeline: self.pipeline,
            index,
        })
    }
}

impl PartialEq for ProcessorRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.pipeline, other.pipeline) && self.index == other.index
    }
}

impl fmt::Debug for ProcessorRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRef")
            .field("name", &self.name())
            .field("index", &self.index)
            .finish()
    }
}

/// Handles of a spawned pipeline
pub(crate) struct RunningPipeline {
    pub input: FrameSender,
    pub output: FrameSender,
    pub handles: Vec<JoinHandle<()>>,
}

/// Builder for Pipeline
pub struct PipelineBuilder {
    name: String,
    processors: Vec<Box<dyn FrameProcessor>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Vec::new(),
        }
    }

    /// Add a processor
    pub fn processor<P: FrameProcessor>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    /// Add a boxed processor
    pub fn processor_boxed(mut self, processor: Box<dyn FrameProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Nest another pipeline; its processors join this chain in order
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.processors.extend(pipeline.processors);
        self
    }

    /// Build the pipeline
    ///
    /// Fails on an empty chain or when two processors share a name, since
    /// the same processor appearing twice would form a cycle.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        if self.processors.is_empty() {
            return Err(PipelineError::EmptyPipeline);
        }

        let mut seen = HashSet::with_capacity(self.processors.len());
        for processor in &self.processors {
            if !seen.insert(processor.name()) {
                return Err(PipelineError::DuplicateProcessor(processor.name().to_string()));
            }
        }

        Ok(Pipeline {
            name: self.name,
            processors: self.processors,
        })
    }
}
