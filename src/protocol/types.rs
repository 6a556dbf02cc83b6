//! Common PostgreSQL wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// A PostgreSQL data type, identified by its `pg_type` OID.
///
/// Well-known types are exposed as associated constants; anything else can be
/// constructed ad hoc from the OID reported by the server. OIDs of built-in
/// types are stable across servers, so the constants below are treated as
/// protocol facts rather than catalog lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType(pub Oid);

impl DataType {
    pub const BOOL: DataType = DataType(16);
    pub const BYTEA: DataType = DataType(17);
    pub const CHAR: DataType = DataType(18);
    pub const NAME: DataType = DataType(19);
    pub const INT8: DataType = DataType(20);
    pub const INT2: DataType = DataType(21);
    pub const INT4: DataType = DataType(23);
    pub const TEXT: DataType = DataType(25);
    pub const OID: DataType = DataType(26);
    pub const JSON: DataType = DataType(114);
    pub const POINT: DataType = DataType(600);
    pub const FLOAT4: DataType = DataType(700);
    pub const FLOAT8: DataType = DataType(701);
    pub const UNKNOWN: DataType = DataType(705);
    pub const INT2_ARRAY: DataType = DataType(1005);
    pub const INT4_ARRAY: DataType = DataType(1007);
    pub const TEXT_ARRAY: DataType = DataType(1009);
    pub const VARCHAR_ARRAY: DataType = DataType(1015);
    pub const INT8_ARRAY: DataType = DataType(1016);
    pub const FLOAT4_ARRAY: DataType = DataType(1021);
    pub const FLOAT8_ARRAY: DataType = DataType(1022);
    pub const BPCHAR: DataType = DataType(1042);
    pub const VARCHAR: DataType = DataType(1043);
    pub const DATE: DataType = DataType(1082);
    pub const TIME: DataType = DataType(1083);
    pub const TIMESTAMP: DataType = DataType(1114);
    pub const TIMESTAMPTZ: DataType = DataType(1184);
    pub const NUMERIC: DataType = DataType(1700);
    pub const VOID: DataType = DataType(2278);
    pub const UUID: DataType = DataType(2950);
    pub const JSONB: DataType = DataType(3802);

    /// Get the raw OID.
    pub const fn oid(self) -> Oid {
        self.0
    }

    /// The wire format this client prefers when it gets to choose.
    ///
    /// Fixed-width machine types go binary; everything whose binary form the
    /// value model does not model natively (dates, numeric, json, arrays,
    /// unknown OIDs) stays text.
    pub fn preferred_format(self) -> FormatCode {
        match self {
            DataType::BOOL
            | DataType::BYTEA
            | DataType::CHAR
            | DataType::INT2
            | DataType::INT4
            | DataType::INT8
            | DataType::OID
            | DataType::FLOAT4
            | DataType::FLOAT8
            | DataType::POINT
            | DataType::UUID => FormatCode::Binary,
            _ => FormatCode::Text,
        }
    }

    /// Static name of a well-known type, for diagnostics.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            DataType::BOOL => "bool",
            DataType::BYTEA => "bytea",
            DataType::CHAR => "\"char\"",
            DataType::NAME => "name",
            DataType::INT8 => "int8",
            DataType::INT2 => "int2",
            DataType::INT4 => "int4",
            DataType::TEXT => "text",
            DataType::OID => "oid",
            DataType::JSON => "json",
            DataType::POINT => "point",
            DataType::FLOAT4 => "float4",
            DataType::FLOAT8 => "float8",
            DataType::UNKNOWN => "unknown",
            DataType::INT2_ARRAY => "int2[]",
            DataType::INT4_ARRAY => "int4[]",
            DataType::TEXT_ARRAY => "text[]",
            DataType::VARCHAR_ARRAY => "varchar[]",
            DataType::INT8_ARRAY => "int8[]",
            DataType::FLOAT4_ARRAY => "float4[]",
            DataType::FLOAT8_ARRAY => "float8[]",
            DataType::BPCHAR => "bpchar",
            DataType::VARCHAR => "varchar",
            DataType::DATE => "date",
            DataType::TIME => "time",
            DataType::TIMESTAMP => "timestamp",
            DataType::TIMESTAMPTZ => "timestamptz",
            DataType::NUMERIC => "numeric",
            DataType::VOID => "void",
            DataType::UUID => "uuid",
            DataType::JSONB => "jsonb",
            _ => return None,
        };
        Some(name)
    }
}

impl From<Oid> for DataType {
    fn from(oid: Oid) -> Self {
        DataType(oid)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "oid {}", self.0),
        }
    }
}

/// Data format code in PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => FormatCode::Text,
            1 => FormatCode::Binary,
            _ => FormatCode::Text, // Default to text for unknown values
        }
    }
}

impl From<u16> for FormatCode {
    fn from(value: u16) -> Self {
        Self::from_u16(value)
    }
}

/// Transaction status indicator from ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in transaction block)
    #[default]
    Idle = b'I',
    /// In transaction block
    InTransaction = b'T',
    /// In failed transaction block (queries will be rejected until rollback)
    Failed = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from a raw byte value.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (either active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::Failed
        )
    }

    /// Returns true if the transaction has failed.
    pub fn is_failed(self) -> bool {
        matches!(self, TransactionStatus::Failed)
    }
}

/// Big-endian 16-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U16BE([u8; 2]);

impl U16BE {
    /// Create a new U16BE from a native u16.
    pub const fn new(value: u16) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native u16 value.
    pub const fn get(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

/// Big-endian 32-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U32BE([u8; 4]);

impl U32BE {
    /// Create a new U32BE from a native u32.
    pub const fn new(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native u32 value.
    pub const fn get(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

/// Big-endian 16-bit signed integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct I16BE([u8; 2]);

impl I16BE {
    /// Create a new I16BE from a native i16.
    pub const fn new(value: i16) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native i16 value.
    pub const fn get(self) -> i16 {
        i16::from_be_bytes(self.0)
    }
}

/// Big-endian 32-bit signed integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct I32BE([u8; 4]);

impl I32BE {
    /// Create a new I32BE from a native i32.
    pub const fn new(value: i32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the native i32 value.
    pub const fn get(self) -> i32 {
        i32::from_be_bytes(self.0)
    }
}
