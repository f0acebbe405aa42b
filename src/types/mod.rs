//! Type system - host value types <-> MySQL native column types
//!
//! The registry walks a fixed, ordered list of native type families. Each
//! family registers four parse variants (nullable x unsigned) and fills two
//! lookup tables:
//! - native type id -> canonical declaration name
//! - host type -> native type id
//!
//! When several families map to the same host type, the family registered
//! LAST becomes the canonical native type for that host type. Generated DDL
//! and parameter declarations depend on this order (`String -> varbinary`,
//! `DateTime -> datetime`), so `FAMILIES` must only be reordered together
//! with the tests that pin it.

mod error;

pub use error::{TypeError, TypeResult};

use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

/// Length used for variable-width types when a declaration has none.
pub const DEFAULT_VARIABLE_LENGTH: u32 = 255;

/// Native column type identifiers
///
/// Values follow the MySQL wire protocol type codes where one exists;
/// unsigned integer variants set the high bit of their signed code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeTypeId {
    Decimal = 0xf6,
    Byte = 0x01,
    UByte = 0x81,
    Int16 = 0x02,
    UInt16 = 0x82,
    Int24 = 0x09,
    UInt24 = 0x89,
    Int32 = 0x03,
    UInt32 = 0x83,
    Int64 = 0x08,
    UInt64 = 0x88,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    VarChar = 0x0f,
    Bit = 0x10,
    Bool = 0xe2,
    Binary = 0xe0,
    VarBinary = 0xe1,
    TinyText = 0xe9,
    MediumText = 0xea,
    LongText = 0xeb,
    Text = 0xec,
    Json = 0xf5,
    Enum = 0xf7,
    Set = 0xf8,
    TinyBlob = 0xf9,
    MediumBlob = 0xfa,
    LongBlob = 0xfb,
    Blob = 0xfc,
    Char = 0xfe,
}

const ALL_TYPE_IDS: &[NativeTypeId] = &[
    NativeTypeId::Decimal,
    NativeTypeId::Byte,
    NativeTypeId::UByte,
    NativeTypeId::Int16,
    NativeTypeId::UInt16,
    NativeTypeId::Int24,
    NativeTypeId::UInt24,
    NativeTypeId::Int32,
    NativeTypeId::UInt32,
    NativeTypeId::Int64,
    NativeTypeId::UInt64,
    NativeTypeId::Float,
    NativeTypeId::Double,
    NativeTypeId::Null,
    NativeTypeId::Timestamp,
    NativeTypeId::Date,
    NativeTypeId::Time,
    NativeTypeId::DateTime,
    NativeTypeId::Year,
    NativeTypeId::VarChar,
    NativeTypeId::Bit,
    NativeTypeId::Bool,
    NativeTypeId::Binary,
    NativeTypeId::VarBinary,
    NativeTypeId::TinyText,
    NativeTypeId::MediumText,
    NativeTypeId::LongText,
    NativeTypeId::Text,
    NativeTypeId::Json,
    NativeTypeId::Enum,
    NativeTypeId::Set,
    NativeTypeId::TinyBlob,
    NativeTypeId::MediumBlob,
    NativeTypeId::LongBlob,
    NativeTypeId::Blob,
    NativeTypeId::Char,
];

impl NativeTypeId {
    /// Check if this type is an integer
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            NativeTypeId::Byte
                | NativeTypeId::UByte
                | NativeTypeId::Int16
                | NativeTypeId::UInt16
                | NativeTypeId::Int24
                | NativeTypeId::UInt24
                | NativeTypeId::Int32
                | NativeTypeId::UInt32
                | NativeTypeId::Int64
                | NativeTypeId::UInt64
        )
    }

    /// Check if this type is numeric
    pub fn is_numeric(&self) -> bool {
        self.is_integer()
            || matches!(
                self,
                NativeTypeId::Decimal | NativeTypeId::Float | NativeTypeId::Double
            )
    }

    /// Check if this is the unsigned variant of an integer type
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            NativeTypeId::UByte
                | NativeTypeId::UInt16
                | NativeTypeId::UInt24
                | NativeTypeId::UInt32
                | NativeTypeId::UInt64
        )
    }

    /// Whether a column or routine parameter of this type must declare a length
    pub fn requires_length(&self) -> bool {
        matches!(
            self,
            NativeTypeId::Char | NativeTypeId::VarChar | NativeTypeId::Binary | NativeTypeId::VarBinary
        )
    }
}

impl From<NativeTypeId> for u8 {
    fn from(id: NativeTypeId) -> u8 {
        id as u8
    }
}

impl TryFrom<u8> for NativeTypeId {
    type Error = TypeError;

    fn try_from(value: u8) -> TypeResult<Self> {
        ALL_TYPE_IDS
            .iter()
            .copied()
            .find(|id| *id as u8 == value)
            .ok_or(TypeError::InvalidTypeId(value))
    }
}

/// Application-level value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Decimal,
    DateTime,
    Time,
    Year,
    String,
    Bytes,
    Json,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostKind::Bool => "bool",
            HostKind::I8 => "i8",
            HostKind::U8 => "u8",
            HostKind::I16 => "i16",
            HostKind::U16 => "u16",
            HostKind::I32 => "i32",
            HostKind::U32 => "u32",
            HostKind::I64 => "i64",
            HostKind::U64 => "u64",
            HostKind::F32 => "f32",
            HostKind::F64 => "f64",
            HostKind::Decimal => "decimal",
            HostKind::DateTime => "datetime",
            HostKind::Time => "time",
            HostKind::Year => "year",
            HostKind::String => "string",
            HostKind::Bytes => "bytes",
            HostKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// A host value type: a kind plus the nullable axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostType {
    pub kind: HostKind,
    pub nullable: bool,
}

impl HostType {
    /// Non-nullable host type of the given kind
    pub const fn new(kind: HostKind) -> Self {
        Self {
            kind,
            nullable: false,
        }
    }

    /// Same kind, nullable
    #[must_use]
    pub const fn nullable(self) -> Self {
        Self {
            kind: self.kind,
            nullable: true,
        }
    }

    /// Same kind, with the given nullability
    #[must_use]
    pub const fn with_nullable(self, nullable: bool) -> Self {
        Self {
            kind: self.kind,
            nullable,
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "Option<{}>", self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

/// Rust types that can be bound to or read from a column.
///
/// Row models use this to describe their fields without runtime reflection.
pub trait HostValue {
    const HOST_TYPE: HostType;
}

macro_rules! host_value {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl HostValue for $ty {
                const HOST_TYPE: HostType = HostType::new(HostKind::$kind);
            }
        )*
    };
}

host_value! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    std::time::Duration => Time,
    std::time::SystemTime => DateTime,
    serde_json::Value => Json,
}

impl<T: HostValue> HostValue for Option<T> {
    const HOST_TYPE: HostType = T::HOST_TYPE.nullable();
}

/// Canonical parse of one native type declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParseResult {
    /// Family name, lower case (`bigint`, `varchar`)
    pub name: String,
    /// First numeric argument, if any
    pub length: Option<u32>,
    /// Second numeric argument (`decimal(10,2)`)
    pub scale: Option<u32>,
    pub host_type: HostType,
    pub native_type: NativeTypeId,
    pub nullable: bool,
    pub unsigned: bool,
}

/// One native type family as registered
struct Family {
    name: &'static str,
    aliases: &'static [&'static str],
    signed: (NativeTypeId, HostKind),
    unsigned: (NativeTypeId, HostKind),
}

const fn family(
    name: &'static str,
    aliases: &'static [&'static str],
    signed: (NativeTypeId, HostKind),
    unsigned: (NativeTypeId, HostKind),
) -> Family {
    Family {
        name,
        aliases,
        signed,
        unsigned,
    }
}

const fn plain(name: &'static str, id: NativeTypeId, kind: HostKind) -> Family {
    family(name, &[], (id, kind), (id, kind))
}

use HostKind as H;
use NativeTypeId as N;

/// Registration order. Later families win host -> native lookups.
const FAMILIES: &[Family] = &[
    plain("bit", N::Bit, H::U64),
    family("bool", &["boolean"], (N::Bool, H::Bool), (N::Bool, H::Bool)),
    family("tinyint", &[], (N::Byte, H::I8), (N::UByte, H::U8)),
    family("smallint", &[], (N::Int16, H::I16), (N::UInt16, H::U16)),
    family("mediumint", &[], (N::Int24, H::I32), (N::UInt24, H::U32)),
    family("int", &["integer"], (N::Int32, H::I32), (N::UInt32, H::U32)),
    family("bigint", &[], (N::Int64, H::I64), (N::UInt64, H::U64)),
    family(
        "decimal",
        &["dec", "numeric", "fixed"],
        (N::Decimal, H::Decimal),
        (N::Decimal, H::Decimal),
    ),
    family("float", &[], (N::Float, H::F32), (N::Float, H::F32)),
    family("double", &["real"], (N::Double, H::F64), (N::Double, H::F64)),
    plain("year", N::Year, H::Year),
    plain("date", N::Date, H::DateTime),
    plain("time", N::Time, H::Time),
    plain("timestamp", N::Timestamp, H::DateTime),
    plain("datetime", N::DateTime, H::DateTime),
    plain("char", N::Char, H::String),
    plain("varchar", N::VarChar, H::String),
    plain("tinytext", N::TinyText, H::String),
    plain("text", N::Text, H::String),
    plain("mediumtext", N::MediumText, H::String),
    plain("longtext", N::LongText, H::String),
    plain("tinyblob", N::TinyBlob, H::Bytes),
    plain("blob", N::Blob, H::Bytes),
    plain("mediumblob", N::MediumBlob, H::Bytes),
    plain("longblob", N::LongBlob, H::Bytes),
    plain("enum", N::Enum, H::String),
    plain("set", N::Set, H::String),
    plain("binary", N::Binary, H::Bytes),
    plain("varbinary", N::VarBinary, H::String),
    plain("json", N::Json, H::Json),
];

lazy_static! {
    static ref DECLARATION_RE: Regex = Regex::new(
        r"(?i)^\s*(?P<name>[a-z]+)\s*(?:\((?P<args>[^)]*)\))?(?P<unsigned>\s+unsigned)?(?:\s+zerofill)?\s*$"
    )
    .expect("declaration pattern is valid");
    static ref GLOBAL: TypeRegistry = TypeRegistry::build();
}

#[derive(Debug, Clone, Copy)]
struct ParseVariant {
    host_type: HostType,
    native_type: NativeTypeId,
}

/// Lookup tables built from `FAMILIES`
#[derive(Debug)]
pub struct TypeRegistry {
    /// (family name, nullable, unsigned) -> variant
    variants: HashMap<(&'static str, bool, bool), ParseVariant>,
    /// alias or family name -> family name
    names: HashMap<&'static str, &'static str>,
    declarations: HashMap<NativeTypeId, String>,
    host_to_native: HashMap<HostType, NativeTypeId>,
}

impl TypeRegistry {
    /// The process-wide registry. Immutable once built.
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL
    }

    /// Build the registry by registering every family in order
    pub fn build() -> Self {
        let mut registry = TypeRegistry {
            variants: HashMap::new(),
            names: HashMap::new(),
            declarations: HashMap::new(),
            host_to_native: HashMap::new(),
        };
        for family in FAMILIES {
            registry.register(family);
        }
        registry
    }

    fn register(&mut self, family: &Family) {
        self.names.insert(family.name, family.name);
        for alias in family.aliases {
            self.names.insert(alias, family.name);
        }

        for nullable in [false, true] {
            for unsigned in [false, true] {
                let (native_type, kind) = if unsigned {
                    family.unsigned
                } else {
                    family.signed
                };
                let host_type = HostType::new(kind).with_nullable(nullable);

                self.variants.insert(
                    (family.name, nullable, unsigned),
                    ParseVariant {
                        host_type,
                        native_type,
                    },
                );
                // Later registrations overwrite: last family wins
                self.host_to_native.insert(host_type, native_type);
                self.declarations
                    .entry(native_type)
                    .or_insert_with(|| declaration_for(family.name, native_type));
            }
        }
    }

    /// Family names in registration order
    pub fn family_names(&self) -> impl Iterator<Item = &'static str> {
        FAMILIES.iter().map(|f| f.name)
    }

    /// Parse a declaration such as `bigint(20) unsigned` or `varchar(64)`
    pub fn parse_native_type(&self, declaration: &str, nullable: bool) -> TypeResult<TypeParseResult> {
        let unparsable = || TypeError::Unparsable(declaration.to_string());

        let caps = DECLARATION_RE.captures(declaration).ok_or_else(unparsable)?;
        let raw_name = caps
            .name("name")
            .map(|m| m.as_str().to_ascii_lowercase())
            .ok_or_else(unparsable)?;
        let name = *self.names.get(raw_name.as_str()).ok_or_else(unparsable)?;
        let unsigned = caps.name("unsigned").is_some();

        let mut numeric_args = caps
            .name("args")
            .map(|m| m.as_str())
            .unwrap_or("")
            .split(',')
            .map(|a| a.trim().parse::<u32>().ok());
        let length = numeric_args.next().flatten();
        let scale = numeric_args.next().flatten();

        // tinyint(1) is how the server reports BOOL columns
        let name = if name == "tinyint" && length == Some(1) && !unsigned {
            "bool"
        } else {
            name
        };

        let variant = self
            .variants
            .get(&(name, nullable, unsigned))
            .ok_or_else(unparsable)?;

        Ok(TypeParseResult {
            name: name.to_string(),
            length,
            scale,
            host_type: variant.host_type,
            native_type: variant.native_type,
            nullable,
            unsigned,
        })
    }

    /// Canonical native type for a host type
    pub fn host_type_to_native_type(&self, host_type: HostType) -> TypeResult<NativeTypeId> {
        self.host_to_native
            .get(&host_type)
            .copied()
            .ok_or(TypeError::Unmapped(host_type))
    }

    /// Declaration name of a native type (`bigint unsigned`)
    pub fn declaration_name(&self, id: NativeTypeId) -> TypeResult<&str> {
        self.declarations
            .get(&id)
            .map(|s| s.as_str())
            .ok_or(TypeError::InvalidTypeId(id.into()))
    }

    /// Declaration for a raw type id, as received from outside the crate
    pub fn declaration_name_for_id(&self, id: u8) -> TypeResult<&str> {
        let id = NativeTypeId::try_from(id)?;
        self.declaration_name(id)
    }

    /// Render a declaration with an optional length, e.g. `varbinary(64)`.
    ///
    /// Types that require a length get `DEFAULT_VARIABLE_LENGTH` when none is given.
    pub fn format_declaration(&self, id: NativeTypeId, length: Option<u32>) -> TypeResult<String> {
        let name = self.declaration_name(id)?;
        let length = match length {
            Some(len) => Some(len),
            None if id.requires_length() => Some(DEFAULT_VARIABLE_LENGTH),
            None => None,
        };
        Ok(match length {
            None => name.to_string(),
            Some(len) => match name.strip_suffix(" unsigned") {
                Some(base) => format!("{}({}) unsigned", base, len),
                None => format!("{}({})", name, len),
            },
        })
    }

    /// Canonical declaration for a host type, via its native type
    pub fn host_type_declaration(&self, host_type: HostType) -> TypeResult<&str> {
        let id = self.host_type_to_native_type(host_type)?;
        self.declaration_name(id)
    }
}

fn declaration_for(family: &str, id: NativeTypeId) -> String {
    if id.is_unsigned() {
        format!("{} unsigned", family)
    } else {
        family.to_string()
    }
}

/// Parse a declaration with the global registry
pub fn parse_native_type(declaration: &str, nullable: bool) -> TypeResult<TypeParseResult> {
    TypeRegistry::global().parse_native_type(declaration, nullable)
}

/// Map a host type with the global registry
pub fn host_type_to_native_type(host_type: HostType) -> TypeResult<NativeTypeId> {
    TypeRegistry::global().host_type_to_native_type(host_type)
}

/// Declaration name of a type id with the global registry
pub fn native_type_id_to_declaration_name(id: NativeTypeId) -> TypeResult<&'static str> {
    TypeRegistry::global().declaration_name(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_length_and_unsigned() {
        let parsed = parse_native_type("bigint(20) unsigned", false).unwrap();
        assert_eq!(parsed.name, "bigint");
        assert_eq!(parsed.length, Some(20));
        assert!(parsed.unsigned);
        assert_eq!(parsed.native_type, NativeTypeId::UInt64);
        assert_eq!(parsed.host_type, HostType::new(HostKind::U64));
    }

    #[test]
    fn test_nullable_changes_host_type_only() {
        let plain = parse_native_type("int(11)", false).unwrap();
        let nullable = parse_native_type("int(11)", true).unwrap();
        assert_eq!(plain.name, nullable.name);
        assert_eq!(plain.length, nullable.length);
        assert_eq!(plain.native_type, nullable.native_type);
        assert!(!plain.host_type.nullable);
        assert!(nullable.host_type.nullable);
    }

    #[test]
    fn test_parse_aliases_and_arguments() {
        assert_eq!(parse_native_type("INTEGER", false).unwrap().name, "int");
        let dec = parse_native_type("decimal(10,2)", false).unwrap();
        assert_eq!((dec.length, dec.scale), (Some(10), Some(2)));
        let e = parse_native_type("enum('a','b')", false);
        // quotes inside the argument list are fine, they are not numeric
        assert!(e.is_ok());
        assert_eq!(e.unwrap().length, None);
    }

    #[test]
    fn test_tinyint_one_is_bool() {
        let parsed = parse_native_type("tinyint(1)", false).unwrap();
        assert_eq!(parsed.native_type, NativeTypeId::Bool);
        let wide = parse_native_type("tinyint(4)", false).unwrap();
        assert_eq!(wide.native_type, NativeTypeId::Byte);
    }

    #[test]
    fn test_unparsable() {
        for decl in ["", "int(", "varchar(10) signed", "no_such_type", "int) unsigned"] {
            assert!(
                matches!(parse_native_type(decl, false), Err(TypeError::Unparsable(_))),
                "{decl:?} should not parse"
            );
        }
    }

    #[test]
    fn test_last_registered_family_wins() {
        let string = HostType::new(HostKind::String);
        assert_eq!(host_type_to_native_type(string).unwrap(), NativeTypeId::VarBinary);
        let dt = HostType::new(HostKind::DateTime);
        assert_eq!(host_type_to_native_type(dt).unwrap(), NativeTypeId::DateTime);
        let u64_ = HostType::new(HostKind::U64);
        assert_eq!(host_type_to_native_type(u64_).unwrap(), NativeTypeId::UInt64);
    }

    #[test]
    fn test_declaration_names() {
        assert_eq!(native_type_id_to_declaration_name(NativeTypeId::UInt32).unwrap(), "int unsigned");
        assert_eq!(native_type_id_to_declaration_name(NativeTypeId::DateTime).unwrap(), "datetime");
        assert!(matches!(
            native_type_id_to_declaration_name(NativeTypeId::Null),
            Err(TypeError::InvalidTypeId(0x06))
        ));
        assert!(matches!(
            TypeRegistry::global().declaration_name_for_id(0x42),
            Err(TypeError::InvalidTypeId(0x42))
        ));
    }

    #[test]
    fn test_format_declaration() {
        let reg = TypeRegistry::global();
        assert_eq!(reg.format_declaration(NativeTypeId::VarBinary, Some(64)).unwrap(), "varbinary(64)");
        assert_eq!(reg.format_declaration(NativeTypeId::VarBinary, None).unwrap(), "varbinary(255)");
        assert_eq!(reg.format_declaration(NativeTypeId::UInt64, Some(20)).unwrap(), "bigint(20) unsigned");
        assert_eq!(reg.format_declaration(NativeTypeId::Int64, None).unwrap(), "bigint");
    }

    #[test]
    fn test_host_value_types() {
        assert_eq!(<Option<i64> as HostValue>::HOST_TYPE, HostType::new(HostKind::I64).nullable());
        assert_eq!(<String as HostValue>::HOST_TYPE.kind, HostKind::String);
        assert_eq!(format!("{}", <Option<u8> as HostValue>::HOST_TYPE), "Option<u8>");
    }
}
