//! Declarative topology construction
//!
//! ```rust
//! use std::sync::Arc;
//! use tasker_bulk::topology::{
//!     Computation, ComputationContext, ComputationDefinition, ComputationError, Record,
//!     StreamDefinition, TopologyBuilder,
//! };
//!
//! struct Sink;
//!
//! #[async_trait::async_trait]
//! impl Computation for Sink {
//!     async fn process_record(
//!         &mut self,
//!         _ctx: &ComputationContext,
//!         _input_stream: &str,
//!         _record: Record,
//!     ) -> Result<(), ComputationError> {
//!         Ok(())
//!     }
//! }
//!
//! let topology = TopologyBuilder::new()
//!     .add_stream(StreamDefinition::new("input"))
//!     .add_computation(
//!         ComputationDefinition::new("sink", Arc::new(|| Box::new(Sink) as Box<dyn Computation>))
//!             .with_inputs(["input"]),
//!     )
//!     .build()
//!     .unwrap();
//! assert_eq!(topology.consumers_of("input"), vec!["sink"]);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::computation::{ComputationFactory, ComputationMetadata};
use super::errors::TopologyError;
use super::filter::RecordFilter;

/// A named stream with its partition count and filter chain
#[derive(Debug, Clone)]
pub struct StreamDefinition {
    pub name: String,
    /// Key space partitions; each consumer maps partitions onto its instances.
    /// Defaults to the consumer's instance count.
    pub partitions: Option<usize>,
    pub filters: Vec<Arc<dyn RecordFilter>>,
}

impl StreamDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: None,
            filters: Vec::new(),
        }
    }

    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn RecordFilter>) -> Self {
        self.filters.push(filter);
        self
    }
}

/// A computation with its input/output streams and parallelism
#[derive(Clone)]
pub struct ComputationDefinition {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Instance count; the runtime default applies when `None`
    pub concurrency: Option<usize>,
    pub factory: ComputationFactory,
}

impl ComputationDefinition {
    pub fn new(name: impl Into<String>, factory: ComputationFactory) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            concurrency: None,
            factory,
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs.extend(outputs.into_iter().map(Into::into));
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn metadata(&self) -> ComputationMetadata {
        ComputationMetadata {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

impl std::fmt::Debug for ComputationDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationDefinition")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// Collects stream and computation definitions and validates them together
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    streams: Vec<StreamDefinition>,
    computations: Vec<ComputationDefinition>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(mut self, stream: StreamDefinition) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn add_computation(mut self, computation: ComputationDefinition) -> Self {
        self.computations.push(computation);
        self
    }

    /// Validate names, stream references and acyclicity
    pub fn build(self) -> Result<Topology, TopologyError> {
        let mut stream_names = HashSet::new();
        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                return Err(TopologyError::InvalidTopology(
                    "stream name must not be blank".to_string(),
                ));
            }
            if !stream_names.insert(stream.name.as_str()) {
                return Err(TopologyError::DuplicateStream(stream.name.clone()));
            }
            if stream.partitions == Some(0) {
                return Err(TopologyError::InvalidTopology(format!(
                    "stream {} must have at least one partition",
                    stream.name
                )));
            }
        }

        let mut computation_names = HashSet::new();
        for computation in &self.computations {
            if !computation_names.insert(computation.name.as_str()) {
                return Err(TopologyError::DuplicateComputation(computation.name.clone()));
            }
            if computation.inputs.is_empty() {
                return Err(TopologyError::InvalidTopology(format!(
                    "computation {} has no input stream",
                    computation.name
                )));
            }
            if computation.concurrency == Some(0) {
                return Err(TopologyError::InvalidTopology(format!(
                    "computation {} must run at least one instance",
                    computation.name
                )));
            }
            for stream in computation.inputs.iter().chain(&computation.outputs) {
                if !stream_names.contains(stream.as_str()) {
                    return Err(TopologyError::UnknownStream(stream.clone()));
                }
            }
            if let Some(stream) = computation
                .outputs
                .iter()
                .find(|output| computation.inputs.contains(output))
            {
                return Err(TopologyError::InvalidTopology(format!(
                    "computation {} consumes its own output stream {stream}",
                    computation.name
                )));
            }
        }

        let topology = Topology {
            streams: self.streams,
            computations: self.computations,
        };
        topology.ensure_acyclic()?;
        Ok(topology)
    }
}

/// A validated set of streams and computations
#[derive(Debug, Clone)]
pub struct Topology {
    streams: Vec<StreamDefinition>,
    computations: Vec<ComputationDefinition>,
}

impl Topology {
    pub fn streams(&self) -> &[StreamDefinition] {
        &self.streams
    }

    pub fn computations(&self) -> &[ComputationDefinition] {
        &self.computations
    }

    pub fn computation(&self, name: &str) -> Option<&ComputationDefinition> {
        self.computations.iter().find(|c| c.name == name)
    }

    /// Computations reading from `stream`, in declaration order
    pub fn consumers_of(&self, stream: &str) -> Vec<&str> {
        self.computations
            .iter()
            .filter(|c| c.inputs.iter().any(|input| input == stream))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Bounded channels deadlock on a cycle, so the computation graph must be a DAG
    fn ensure_acyclic(&self) -> Result<(), TopologyError> {
        let edges: HashMap<&str, Vec<&str>> = self
            .computations
            .iter()
            .map(|c| {
                let downstream = c
                    .outputs
                    .iter()
                    .flat_map(|stream| self.consumers_of(stream))
                    .collect();
                (c.name.as_str(), downstream)
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a>(
            node: &'a str,
            edges: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), TopologyError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(TopologyError::InvalidTopology(format!(
                        "cycle detected through computation {node}"
                    )))
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            for next in edges.get(node).into_iter().flatten() {
                visit(*next, edges, marks)?;
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for computation in &self.computations {
            visit(&computation.name, &edges, &mut marks)?;
        }
        Ok(())
    }
}
