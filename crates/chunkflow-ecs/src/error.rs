//! Entity store error types.

use thiserror::Error;

use crate::{archetype::ArchetypeId, component::ComponentId, entity::Entity};

/// Errors returned by [`World`](crate::World) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EcsError {
    /// The handle's generation no longer matches the store.
    #[error("stale entity handle: {0}")]
    StaleEntity(Entity),

    /// The entity is alive but does not own the requested component.
    #[error("entity {entity} has no component {component}")]
    MissingComponent {
        entity: Entity,
        component: &'static str,
    },

    /// The component type was never registered with the world.
    #[error("component type not registered: {0}")]
    UnregisteredComponent(&'static str),

    /// A raw component id that the registry never handed out.
    #[error("unknown component id: {0:?}")]
    UnknownComponentId(ComponentId),

    #[error("unknown archetype: {0:?}")]
    UnknownArchetype(ArchetypeId),
}

/// Result type for entity store operations.
pub type EcsResult<T> = Result<T, EcsError>;
