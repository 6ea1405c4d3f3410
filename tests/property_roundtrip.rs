//! Property-based tests for the block codec
//!
//! Random entity sequences are packed into a buffer, encoded into blocks and
//! decoded again; every field must survive.

use osmblock::pbf::{decode_primitive_block, BlockEncoder};
use osmblock::{
    Buffer, EntityBits, EntityData, Location, MemberType, Metadata, NodeData, PbfOptions,
    RelationData, WayData,
};
use proptest::prelude::*;

fn metadata() -> impl Strategy<Value = Option<Metadata>> {
    prop::option::of(
        (1u32..10_000, 0i64..2_000_000_000, 0i64..100_000_000, 0i32..10_000_000, "[a-z]{0,6}")
            .prop_map(|(version, timestamp, changeset, uid, user)| Metadata {
                version,
                timestamp,
                changeset,
                uid,
                user,
            }),
    )
}

fn tags() -> impl Strategy<Value = Vec<(String, String)>> {
    // Small alphabets so strings repeat within a block
    prop::collection::vec(("[a-c]{1,3}", "[x-z ]{0,4}"), 0..4)
}

fn node() -> impl Strategy<Value = EntityData> {
    (
        any::<i64>(),
        -1_800_000_000i32..=1_800_000_000,
        -900_000_000i32..=900_000_000,
        metadata(),
        tags(),
    )
        .prop_map(|(id, x, y, metadata, tags)| {
            EntityData::Node(NodeData {
                metadata,
                tags,
                ..NodeData::new(id, Location::new(x, y))
            })
        })
}

fn way() -> impl Strategy<Value = EntityData> {
    (
        any::<i64>(),
        prop::collection::vec(-1_000_000_000i64..1_000_000_000, 0..20),
        metadata(),
        tags(),
    )
        .prop_map(|(id, nodes, metadata, tags)| {
            EntityData::Way(WayData {
                metadata,
                tags,
                ..WayData::new(id, nodes)
            })
        })
}

fn member_type() -> impl Strategy<Value = MemberType> {
    prop_oneof![
        Just(MemberType::Node),
        Just(MemberType::Way),
        Just(MemberType::Relation)
    ]
}

fn relation() -> impl Strategy<Value = EntityData> {
    (
        any::<i64>(),
        prop::collection::vec((member_type(), any::<i32>().prop_map(i64::from), "[a-z]{0,5}"), 0..8),
        metadata(),
        tags(),
    )
        .prop_map(|(id, members, metadata, tags)| {
            EntityData::Relation(RelationData {
                metadata,
                tags,
                ..RelationData::new(id, members)
            })
        })
}

fn entities() -> impl Strategy<Value = Vec<EntityData>> {
    prop::collection::vec(prop_oneof![node(), way(), relation()], 0..40)
}

fn roundtrip(entities: &[EntityData], options: PbfOptions) -> Vec<EntityData> {
    let mut buffer = Buffer::new();
    for entity in entities {
        buffer.push_entity(entity).unwrap();
    }

    let mut encoder = BlockEncoder::new(options);
    let mut blocks = Vec::new();
    for entity in buffer.entities() {
        if let Some(block) = encoder.push(&entity.unwrap()).unwrap() {
            blocks.push(block);
        }
    }
    blocks.extend(encoder.finish());

    let mut decoded = Vec::new();
    for block in &blocks {
        let buffer = decode_primitive_block(block, EntityBits::ALL).unwrap();
        assert_aligned(&buffer);
        decoded.extend(buffer.entities().map(|e| EntityData::from(&e.unwrap())));
    }
    decoded
}

fn assert_aligned(buffer: &Buffer<'_>) {
    assert!(buffer.is_aligned());
    assert_eq!(buffer.committed() % 8, 0);
}

proptest! {
    #[test]
    fn prop_roundtrip_dense(entities in entities()) {
        let decoded = roundtrip(&entities, PbfOptions::default());
        prop_assert_eq!(decoded, entities);
    }

    #[test]
    fn prop_roundtrip_plain_nodes(entities in entities()) {
        let options = PbfOptions {
            use_dense_nodes: false,
            ..PbfOptions::default()
        };
        let decoded = roundtrip(&entities, options);
        prop_assert_eq!(decoded, entities);
    }

    #[test]
    fn prop_roundtrip_history_keeps_visibility(
        entities in entities(),
        hidden in prop::collection::vec(any::<bool>(), 40)
    ) {
        let entities: Vec<EntityData> = entities
            .into_iter()
            .zip(hidden)
            .map(|(mut entity, hide)| {
                let visible = !hide;
                match &mut entity {
                    EntityData::Node(n) => n.visible = visible,
                    EntityData::Way(w) => w.visible = visible,
                    EntityData::Relation(r) => r.visible = visible,
                }
                entity
            })
            .collect();

        for dense in [true, false] {
            let options = PbfOptions {
                use_dense_nodes: dense,
                ..PbfOptions::history()
            };
            let decoded = roundtrip(&entities, options);
            prop_assert_eq!(&decoded, &entities);
        }
    }

    #[test]
    fn prop_without_metadata_drops_it(entities in entities()) {
        let options = PbfOptions {
            add_metadata: false,
            ..PbfOptions::default()
        };
        let expected: Vec<EntityData> = entities
            .iter()
            .cloned()
            .map(|mut entity| {
                match &mut entity {
                    EntityData::Node(n) => n.metadata = None,
                    EntityData::Way(w) => w.metadata = None,
                    EntityData::Relation(r) => r.metadata = None,
                }
                entity
            })
            .collect();
        prop_assert_eq!(roundtrip(&entities, options), expected);
    }
}

#[test]
fn test_filter_skips_groups() {
    let entities = vec![
        EntityData::Node(NodeData::new(1, Location::new(1, 2))),
        EntityData::Way(WayData::new(2, vec![1])),
        EntityData::Relation(RelationData::new(3, vec![(MemberType::Way, 2, "outer".into())])),
    ];
    let mut buffer = Buffer::new();
    for entity in &entities {
        buffer.push_entity(entity).unwrap();
    }

    let mut encoder = BlockEncoder::new(PbfOptions::default());
    let mut blocks = Vec::new();
    for entity in buffer.entities() {
        blocks.extend(encoder.push(&entity.unwrap()).unwrap());
    }
    blocks.extend(encoder.finish());
    assert_eq!(blocks.len(), 3);

    let filter = EntityBits::WAY | EntityBits::RELATION;
    let ids: Vec<i64> = blocks
        .iter()
        .flat_map(|block| {
            let buffer = decode_primitive_block(block, filter).unwrap();
            buffer
                .entities()
                .map(|e| e.unwrap().id())
                .collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(ids, vec![2, 3]);
}
