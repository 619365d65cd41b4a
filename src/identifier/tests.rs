use super::*;

#[test]
fn valid_ids_normalize_and_revalidate_for_every_backend() {
    for kind in BackendKind::ALL {
        let raw = match kind.id_format() {
            IdFormat::Hex32 => "0123456789ABCDEF0123456789ABCDEF",
            IdFormat::ObjectId => "507F1F77BCF86CD799439011",
            IdFormat::Uuid => "{67E55044-10B1-426F-9247-BB680E5FE0C8}",
        };

        let normalized = normalize(raw, kind).expect("should normalize valid id");
        let again = normalize(normalized.as_str(), kind).expect("normalized id should revalidate");
        assert_eq!(normalized, again, "{} normalization is not stable", kind);
    }
}

#[test]
fn hex32_rejects_wrong_shapes() {
    let cases = [
        "",
        "0123456789ABCDEF0123456789ABCDE",
        "0123456789ABCDEF0123456789ABCDEF0",
        "0123456789abcdef0123456789abcdef",
        "0123456789ABCDEF0123456789ABCDEG",
        "0123456789ABCDEF-123456789ABCDEF",
    ];

    for raw in cases {
        let err = normalize(raw, BackendKind::VectorOracle).expect_err("should reject");
        assert!(
            matches!(err, StoreError::InvalidIdentifier { format: IdFormat::Hex32, .. }),
            "unexpected error for {:?}: {}",
            raw,
            err
        );
    }
}

#[test]
fn object_id_is_lowercased_and_validated() {
    let id = normalize("507F1F77BCF86CD799439011", BackendKind::DocMongo)
        .expect("should accept uppercase object id");
    assert_eq!(id.as_str(), "507f1f77bcf86cd799439011");
    assert_eq!(id.format(), IdFormat::ObjectId);

    for raw in ["507f1f77bcf86cd79943901", "507f1f77bcf86cd7994390112", "zz7f1f77bcf86cd799439011"] {
        assert!(normalize(raw, BackendKind::DocMongo).is_err(), "accepted {:?}", raw);
    }
}

#[test]
fn uuid_formatting_differences_are_normalized_away() {
    let forms = [
        "67e55044-10b1-426f-9247-bb680e5fe0c8",
        "67E55044-10B1-426F-9247-BB680E5FE0C8",
        "67e5504410b1426f9247bb680e5fe0c8",
        "{67e55044-10b1-426f-9247-bb680e5fe0c8}",
        "urn:uuid:67e55044-10b1-426f-9247-bb680e5fe0c8",
    ];

    for raw in forms {
        let id = normalize(raw, BackendKind::VectorQdrant).expect("should parse uuid");
        assert_eq!(id.as_str(), "67e55044-10b1-426f-9247-bb680e5fe0c8");
    }
}

#[test]
fn malformed_uuids_are_rejected() {
    for raw in ["", "not-a-uuid", "67e55044-10b1-426f-9247-bb680e5fe0c", "67e55044-10b1-426f-9247-bb680e5fe0cz"] {
        let err = normalize(raw, BackendKind::DocCosmos).expect_err("should reject");
        assert!(matches!(err, StoreError::InvalidIdentifier { format: IdFormat::Uuid, .. }));
    }
}

#[test]
fn generated_ids_validate_in_their_own_format() {
    for format in [IdFormat::Hex32, IdFormat::ObjectId, IdFormat::Uuid] {
        let id = RecordId::generate(format);
        let parsed = RecordId::parse(id.as_str(), format).expect("generated id should parse");
        assert_eq!(parsed, id);
    }
}

#[test]
fn generated_object_ids_are_unique() {
    let a = RecordId::generate(IdFormat::ObjectId);
    let b = RecordId::generate(IdFormat::ObjectId);
    assert_ne!(a, b);
}

#[test]
fn derived_ids_are_deterministic() {
    let a = RecordId::derive(IdFormat::Uuid, "doc-1").expect("uuid derivation");
    let b = RecordId::derive(IdFormat::Uuid, "doc-1").expect("uuid derivation");
    let c = RecordId::derive(IdFormat::Uuid, "doc-2").expect("uuid derivation");
    assert_eq!(a, b);
    assert_ne!(a, c);

    let hex = RecordId::derive(IdFormat::Hex32, "doc-1").expect("hex derivation");
    assert!(RecordId::parse(hex.as_str(), IdFormat::Hex32).is_ok());
    assert_eq!(hex.as_str(), a.as_str().replace('-', "").to_ascii_uppercase());

    assert!(RecordId::derive(IdFormat::ObjectId, "doc-1").is_none());
}

#[test]
fn backend_kind_parses_from_config_names() {
    assert_eq!(
        "vector_qdrant".parse::<BackendKind>().expect("known kind"),
        BackendKind::VectorQdrant
    );
    assert_eq!(
        " DOC_MONGO ".parse::<BackendKind>().expect("known kind"),
        BackendKind::DocMongo
    );

    let err = "redis".parse::<BackendKind>().expect_err("unknown kind");
    assert!(matches!(err, StoreError::UnsupportedBackend(name) if name == "redis"));
}

#[test]
fn backend_roles() {
    assert_eq!(BackendKind::DocSqlite.role(), BackendRole::Document);
    assert_eq!(BackendKind::DocCosmos.role(), BackendRole::Document);
    assert_eq!(BackendKind::VectorPgvector.role(), BackendRole::Vector);
    assert_eq!(BackendKind::VectorOracle.role(), BackendRole::Vector);
}

#[test]
fn record_ids_collect_into_ordered_sets() {
    let ids: std::collections::BTreeSet<RecordId> = [
        "507F1F77BCF86CD799439012",
        "507f1f77bcf86cd799439011",
        "507F1F77BCF86CD799439012",
    ]
    .into_iter()
    .map(|raw| normalize(raw, BackendKind::DocMongo).expect("should normalize object id"))
    .collect();

    let ordered: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
    assert_eq!(ordered, vec!["507f1f77bcf86cd799439011", "507f1f77bcf86cd799439012"]);
    assert!(IdFormat::Hex32 < IdFormat::Uuid);
}
