//! Pipeline/object membership and draw order.

use anyhow::{anyhow, Result};

use crate::error::{EngineError, Subsystem};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub(crate) usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub(crate) usize);

impl PipelineId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Records which pipeline draws which object, in registration order.
///
/// Every object belongs to at most one pipeline. Draws are pipeline-major,
/// then object order within the pipeline.
#[derive(Clone, Debug, Default)]
pub struct DrawRegistry {
    pipelines: Vec<Vec<ObjectId>>,
    owners: Vec<Option<PipelineId>>,
}

impl DrawRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pipeline(&mut self) -> PipelineId {
        self.pipelines.push(Vec::new());
        PipelineId(self.pipelines.len() - 1)
    }

    pub fn add_object(&mut self) -> ObjectId {
        self.owners.push(None);
        ObjectId(self.owners.len() - 1)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn object_count(&self) -> usize {
        self.owners.len()
    }

    pub fn bind(&mut self, pipeline: PipelineId, object: ObjectId) -> Result<()> {
        let members = self
            .pipelines
            .get_mut(pipeline.0)
            .ok_or_else(|| anyhow!(EngineError::ResourceCreation(
                Subsystem::Pipeline,
                format!("unknown pipeline {}", pipeline.0),
            )))?;
        let owner = self
            .owners
            .get_mut(object.0)
            .ok_or_else(|| anyhow!(EngineError::ResourceCreation(
                Subsystem::Pipeline,
                format!("unknown object {}", object.0),
            )))?;

        if let Some(existing) = owner {
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Pipeline,
                format!("object {} already bound to pipeline {}", object.0, existing.0),
            )));
        }

        *owner = Some(pipeline);
        members.push(object);
        Ok(())
    }

    pub fn owner_of(&self, object: ObjectId) -> Option<PipelineId> {
        self.owners.get(object.0).copied().flatten()
    }

    pub fn objects_of(&self, pipeline: PipelineId) -> &[ObjectId] {
        self.pipelines
            .get(pipeline.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every bound object with its pipeline, in draw order.
    pub fn draw_order(&self) -> impl Iterator<Item = (PipelineId, ObjectId)> + '_ {
        self.pipelines
            .iter()
            .enumerate()
            .flat_map(|(p, objects)| objects.iter().map(move |&o| (PipelineId(p), o)))
    }

    /// Draw order grouped for recording: each pipeline with at least one
    /// object appears once, followed by its objects.
    pub fn batches(&self) -> impl Iterator<Item = (PipelineId, &[ObjectId])> + '_ {
        self.pipelines
            .iter()
            .enumerate()
            .filter(|(_, objects)| !objects.is_empty())
            .map(|(p, objects)| (PipelineId(p), objects.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_order_is_pipeline_major() {
        let mut registry = DrawRegistry::new();
        let first = registry.add_pipeline();
        let second = registry.add_pipeline();
        let a = registry.add_object();
        let b = registry.add_object();
        let c = registry.add_object();

        registry.bind(second, a).unwrap();
        registry.bind(first, b).unwrap();
        registry.bind(second, c).unwrap();

        let order: Vec<_> = registry.draw_order().collect();
        assert_eq!(order, vec![(first, b), (second, a), (second, c)]);
    }

    #[test]
    fn object_belongs_to_one_pipeline() {
        let mut registry = DrawRegistry::new();
        let first = registry.add_pipeline();
        let second = registry.add_pipeline();
        let object = registry.add_object();

        registry.bind(first, object).unwrap();
        assert!(registry.bind(second, object).is_err());
        assert_eq!(registry.owner_of(object), Some(first));
        assert!(registry.objects_of(second).is_empty());
    }

    #[test]
    fn unbound_objects_are_not_drawn() {
        let mut registry = DrawRegistry::new();
        registry.add_pipeline();
        registry.add_object();
        assert_eq!(registry.draw_order().count(), 0);
        assert_eq!(registry.object_count(), 1);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut registry = DrawRegistry::new();
        let object = registry.add_object();
        assert!(registry.bind(PipelineId(3), object).is_err());
        let pipeline = registry.add_pipeline();
        assert!(registry.bind(pipeline, ObjectId(9)).is_err());
    }

    #[test]
    fn batches_bind_each_pipeline_once() {
        let mut registry = DrawRegistry::new();
        let textured = registry.add_pipeline();
        let empty = registry.add_pipeline();
        let flat = registry.add_pipeline();
        let objects: Vec<_> = (0..4).map(|_| registry.add_object()).collect();
        registry.bind(flat, objects[0]).unwrap();
        registry.bind(textured, objects[1]).unwrap();
        registry.bind(flat, objects[2]).unwrap();
        registry.bind(textured, objects[3]).unwrap();

        let batches: Vec<_> = registry.batches().collect();
        assert_eq!(
            batches,
            vec![
                (textured, &[objects[1], objects[3]][..]),
                (flat, &[objects[0], objects[2]][..]),
            ]
        );
        assert!(batches.iter().all(|(p, _)| *p != empty));

        let flattened: Vec<_> = batches
            .iter()
            .flat_map(|(p, objects)| objects.iter().map(move |o| (*p, *o)))
            .collect();
        assert_eq!(flattened, registry.draw_order().collect::<Vec<_>>());
    }
}
