//! Type system integration tests

use dbcore::types::{
    host_type_to_native_type, native_type_id_to_declaration_name, parse_native_type, HostKind,
    HostType, NativeTypeId, TypeError, TypeRegistry,
};

/// Declaration reached by parse -> host type -> native type -> name
fn round_trip(decl: &str, nullable: bool) -> String {
    let parsed = parse_native_type(decl, nullable).unwrap();
    let id = host_type_to_native_type(parsed.host_type).unwrap();
    native_type_id_to_declaration_name(id).unwrap().to_string()
}

// ============ Round Trip ============

#[test]
fn test_round_trip_every_family_and_variant() {
    let registry = TypeRegistry::global();
    for family in registry.family_names() {
        for nullable in [false, true] {
            for unsigned in [false, true] {
                let decl = if unsigned {
                    format!("{} unsigned", family)
                } else {
                    family.to_string()
                };
                let parsed = parse_native_type(&decl, nullable).unwrap();
                assert_eq!(parsed.nullable, nullable);
                assert_eq!(parsed.unsigned, unsigned);
                assert_eq!(parsed.host_type.nullable, nullable);

                // The canonical declaration is a fixed point of the round trip
                let canonical = round_trip(&decl, nullable);
                assert_eq!(round_trip(&canonical, nullable), canonical, "{decl}");

                // and it lands on the same host type
                let reparsed = parse_native_type(&canonical, nullable).unwrap();
                assert_eq!(reparsed.host_type, parsed.host_type, "{decl} -> {canonical}");
            }
        }
    }
}

#[test]
fn test_round_trip_canonical_names() {
    let cases = [
        ("bigint(20) unsigned", "bigint unsigned"),
        ("bigint(20)", "bigint"),
        ("int(11)", "int"),
        ("mediumint(8)", "int"),
        ("smallint(6) unsigned", "smallint unsigned"),
        ("tinyint(1)", "bool"),
        ("varchar(64)", "varbinary"),
        ("char(36)", "varbinary"),
        ("longtext", "varbinary"),
        ("enum('a','b')", "varbinary"),
        ("timestamp", "datetime"),
        ("datetime(6)", "datetime"),
        ("blob", "binary"),
        ("varbinary(16)", "varbinary"),
        ("double", "double"),
        ("decimal(10,2)", "decimal"),
        ("json", "json"),
        ("year", "year"),
    ];
    for (decl, canonical) in cases {
        assert_eq!(round_trip(decl, false), canonical, "{decl}");
        assert_eq!(round_trip(decl, true), canonical, "{decl} nullable");
    }
}

// ============ Registration Order ============

#[test]
fn test_string_maps_to_varbinary() {
    assert_eq!(
        host_type_to_native_type(HostType::new(HostKind::String)).unwrap(),
        NativeTypeId::VarBinary
    );
    assert_eq!(
        host_type_to_native_type(HostType::new(HostKind::String).nullable()).unwrap(),
        NativeTypeId::VarBinary
    );
}

#[test]
fn test_date_maps_to_datetime() {
    assert_eq!(
        host_type_to_native_type(HostType::new(HostKind::DateTime)).unwrap(),
        NativeTypeId::DateTime
    );
}

#[test]
fn test_integers_map_to_their_own_width() {
    let cases = [
        (HostKind::I8, NativeTypeId::Byte),
        (HostKind::U8, NativeTypeId::UByte),
        (HostKind::I16, NativeTypeId::Int16),
        (HostKind::U16, NativeTypeId::UInt16),
        (HostKind::I32, NativeTypeId::Int32),
        (HostKind::U32, NativeTypeId::UInt32),
        (HostKind::I64, NativeTypeId::Int64),
        (HostKind::U64, NativeTypeId::UInt64),
        (HostKind::Bool, NativeTypeId::Bool),
        (HostKind::F32, NativeTypeId::Float),
        (HostKind::F64, NativeTypeId::Double),
    ];
    for (kind, expected) in cases {
        assert_eq!(
            host_type_to_native_type(HostType::new(kind)).unwrap(),
            expected,
            "{kind}"
        );
    }
}

// ============ Errors ============

#[test]
fn test_unparsable_declarations() {
    for decl in ["varchar(", "unsigned", "int unsigned unsigned", "geometry"] {
        assert!(matches!(
            parse_native_type(decl, false),
            Err(TypeError::Unparsable(d)) if d == decl
        ));
    }
}

#[test]
fn test_invalid_type_id() {
    assert!(matches!(
        NativeTypeId::try_from(0x00u8),
        Err(TypeError::InvalidTypeId(0))
    ));
    assert_eq!(NativeTypeId::try_from(0x83u8).unwrap(), NativeTypeId::UInt32);
}

#[test]
fn test_nullable_and_unsigned_are_orthogonal() {
    let a = parse_native_type("int(10) unsigned", true).unwrap();
    let b = parse_native_type("int(10)", false).unwrap();
    assert_eq!(a.name, b.name);
    assert_eq!(a.length, b.length);
    assert_ne!(a.native_type, b.native_type);
    assert_eq!(a.host_type, HostType::new(HostKind::U32).nullable());
    assert_eq!(b.host_type, HostType::new(HostKind::I32));
}
