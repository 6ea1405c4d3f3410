//! Owned entity values
//!
//! Used to feed entities from sources other than a buffer into the builder,
//! and to compare decoded entities in tests.

use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, Location, MemberType, NodeRef, ObjectBuilder, ObjectRef};
use super::{RelationRef, WayRef};
use crate::error::Result;
use crate::memory::Buffer;

/// Version, timestamp, changeset and user of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub version: u32,
    /// Seconds since the epoch
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i32,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: i64,
    pub location: Location,
    pub metadata: Option<Metadata>,
    pub visible: bool,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WayData {
    pub id: i64,
    pub metadata: Option<Metadata>,
    pub visible: bool,
    pub tags: Vec<(String, String)>,
    pub nodes: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationData {
    pub id: i64,
    pub metadata: Option<Metadata>,
    pub visible: bool,
    pub tags: Vec<(String, String)>,
    pub members: Vec<(MemberType, i64, String)>,
}

/// Any owned entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityData {
    Node(NodeData),
    Way(WayData),
    Relation(RelationData),
}

impl NodeData {
    /// A visible node without metadata or tags
    pub fn new(id: i64, location: Location) -> Self {
        NodeData {
            id,
            location,
            metadata: None,
            visible: true,
            tags: Vec::new(),
        }
    }
}

impl WayData {
    pub fn new(id: i64, nodes: Vec<i64>) -> Self {
        WayData {
            id,
            metadata: None,
            visible: true,
            tags: Vec::new(),
            nodes,
        }
    }
}

impl RelationData {
    pub fn new(id: i64, members: Vec<(MemberType, i64, String)>) -> Self {
        RelationData {
            id,
            metadata: None,
            visible: true,
            tags: Vec::new(),
            members,
        }
    }
}

impl EntityData {
    pub fn id(&self) -> i64 {
        match self {
            EntityData::Node(node) => node.id,
            EntityData::Way(way) => way.id,
            EntityData::Relation(relation) => relation.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityData::Node(_) => EntityKind::Node,
            EntityData::Way(_) => EntityKind::Way,
            EntityData::Relation(_) => EntityKind::Relation,
        }
    }
}

fn start<'b, 'a>(
    buffer: &'b mut Buffer<'a>,
    kind: EntityKind,
    id: i64,
    metadata: Option<&Metadata>,
    visible: bool,
    tags: &[(String, String)],
) -> Result<ObjectBuilder<'b, 'a>> {
    let user = metadata.map_or("", |m| m.user.as_str());
    let mut builder = ObjectBuilder::new(buffer, kind, id, user)?;
    if let Some(m) = metadata {
        builder
            .set_version(m.version)
            .set_timestamp(m.timestamp)
            .set_changeset(m.changeset)
            .set_uid(m.uid);
    }
    builder.set_visible(visible);
    if !tags.is_empty() {
        builder.add_tags(tags.iter().map(|(k, v)| (k, v)))?;
    }
    Ok(builder)
}

impl<'a> Buffer<'a> {
    /// Build and commit a node, returning its offset
    pub fn push_node(&mut self, node: &NodeData) -> Result<usize> {
        let mut builder = start(
            self,
            EntityKind::Node,
            node.id,
            node.metadata.as_ref(),
            node.visible,
            &node.tags,
        )?;
        builder.set_location(node.location)?;
        builder.commit()
    }

    pub fn push_way(&mut self, way: &WayData) -> Result<usize> {
        let mut builder = start(
            self,
            EntityKind::Way,
            way.id,
            way.metadata.as_ref(),
            way.visible,
            &way.tags,
        )?;
        builder.add_way_nodes(way.nodes.iter().copied())?;
        builder.commit()
    }

    pub fn push_relation(&mut self, relation: &RelationData) -> Result<usize> {
        let mut builder = start(
            self,
            EntityKind::Relation,
            relation.id,
            relation.metadata.as_ref(),
            relation.visible,
            &relation.tags,
        )?;
        builder.add_members(
            relation
                .members
                .iter()
                .map(|(member_type, member_ref, role)| (*member_type, *member_ref, role)),
        )?;
        builder.commit()
    }

    pub fn push_entity(&mut self, entity: &EntityData) -> Result<usize> {
        match entity {
            EntityData::Node(node) => self.push_node(node),
            EntityData::Way(way) => self.push_way(way),
            EntityData::Relation(relation) => self.push_relation(relation),
        }
    }
}

fn metadata_of(object: &ObjectRef<'_>) -> Option<Metadata> {
    object.has_metadata().then(|| Metadata {
        version: object.version(),
        timestamp: object.timestamp(),
        changeset: object.changeset(),
        uid: object.uid(),
        user: object.user().to_string(),
    })
}

fn tags_of(object: &ObjectRef<'_>) -> Vec<(String, String)> {
    object
        .tags()
        .map(|tag| (tag.key.to_string(), tag.value.to_string()))
        .collect()
}

impl From<&NodeRef<'_>> for NodeData {
    fn from(node: &NodeRef<'_>) -> Self {
        NodeData {
            id: node.id(),
            location: node.location(),
            metadata: metadata_of(node),
            visible: node.visible(),
            tags: tags_of(node),
        }
    }
}

impl From<&WayRef<'_>> for WayData {
    fn from(way: &WayRef<'_>) -> Self {
        WayData {
            id: way.id(),
            metadata: metadata_of(way),
            visible: way.visible(),
            tags: tags_of(way),
            nodes: way.nodes().collect(),
        }
    }
}

impl From<&RelationRef<'_>> for RelationData {
    fn from(relation: &RelationRef<'_>) -> Self {
        RelationData {
            id: relation.id(),
            metadata: metadata_of(relation),
            visible: relation.visible(),
            tags: tags_of(relation),
            members: relation
                .members()
                .map(|m| (m.member_type, m.member_ref, m.role.to_string()))
                .collect(),
        }
    }
}

impl From<&Entity<'_>> for EntityData {
    fn from(entity: &Entity<'_>) -> Self {
        match entity {
            Entity::Node(node) => EntityData::Node(node.into()),
            Entity::Way(way) => EntityData::Way(way.into()),
            Entity::Relation(relation) => EntityData::Relation(relation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(version: u32) -> Metadata {
        Metadata {
            version,
            timestamp: 1_234_567_890,
            changeset: 77,
            uid: 12,
            user: "Zoë".to_string(),
        }
    }

    #[test]
    fn test_push_and_read_back() {
        let node = NodeData {
            metadata: Some(metadata(1)),
            tags: vec![("amenity".into(), "bench".into())],
            ..NodeData::new(1, Location::from_degrees(-0.1, 51.5))
        };
        let way = WayData {
            visible: false,
            metadata: Some(metadata(4)),
            ..WayData::new(2, vec![1, 1, 3])
        };
        let relation = RelationData::new(
            3,
            vec![
                (MemberType::Way, 2, "outer".into()),
                (MemberType::Relation, 3, String::new()),
            ],
        );
        let entities = vec![
            EntityData::Node(node),
            EntityData::Way(way),
            EntityData::Relation(relation),
        ];

        let mut buffer = Buffer::new();
        for entity in &entities {
            buffer.push_entity(entity).unwrap();
        }

        let read: Vec<EntityData> = buffer
            .entities()
            .map(|e| EntityData::from(&e.unwrap()))
            .collect();
        assert_eq!(read, entities);
    }

    #[test]
    fn test_node_without_location() {
        let mut buffer = Buffer::new();
        let offset = buffer
            .push_node(&NodeData::new(5, Location::undefined()))
            .unwrap();
        let Entity::Node(node) = buffer.entity(offset).unwrap() else {
            panic!("expected a node");
        };
        assert!(!node.location().is_defined());
        assert!(!node.has_metadata());
    }
}
