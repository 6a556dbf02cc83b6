//! The protocol message model.
//!
//! [`Message`] is one closed union over both directions of the PostgreSQL
//! frontend/backend protocol. Frontend cases encode via [`Message::encode`];
//! backend cases are produced by [`Message::decode`] from a framed payload.
//! Messages own their payloads and live only for the exchange that carries
//! them.

use crate::error::{Error, ErrorFields, Result};

use super::backend;
use super::frontend;
use super::types::{DataType, FormatCode, Oid, TransactionStatus};

/// A PostgreSQL protocol message, frontend or backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    // Frontend
    /// Startup message (no type byte): protocol version + parameter pairs.
    Startup(Startup),
    /// SSLRequest (no type byte): asks whether the server speaks TLS.
    SslRequest,
    /// CancelRequest (no type byte): fired on a fresh connection.
    CancelRequest(CancelRequest),
    /// PasswordMessage: cleartext or MD5 digest response.
    Password(Password),
    /// SASLInitialResponse: mechanism selection + client-first-message.
    SaslInitialResponse(SaslInitialResponse),
    /// SASLResponse: client-final-message.
    SaslResponse(SaslResponse),
    /// Simple query.
    Query(Query),
    /// Extended query: parse SQL into a prepared statement.
    Parse(Parse),
    /// Extended query: bind parameter values to a portal.
    Bind(Bind),
    /// Extended query: describe a statement or portal.
    Describe(Describe),
    /// Extended query: run a bound portal.
    Execute(Execute),
    /// Extended query: close the implicit transaction and request ReadyForQuery.
    Sync,
    /// Graceful connection shutdown.
    Terminate,

    // Backend
    /// Authentication request/acknowledgement family.
    Authentication(Authentication),
    /// Run-time parameter report (server_version, client_encoding, ...).
    ParameterStatus(ParameterStatus),
    /// Cancellation key for this session.
    BackendKeyData(BackendKeyData),
    /// Server is ready for the next query cycle.
    ReadyForQuery(ReadyForQuery),
    /// Shape of the DataRow messages that follow.
    RowDescription(RowDescription),
    /// One result row.
    DataRow(DataRow),
    /// Command finished; carries the command tag.
    CommandComplete(CommandComplete),
    /// The query string was empty.
    EmptyQueryResponse,
    /// Parse succeeded.
    ParseComplete,
    /// Bind succeeded.
    BindComplete,
    /// Describe of a statement/portal that returns no rows.
    NoData,
    /// Parameter type OIDs of a described statement.
    ParameterDescription(ParameterDescription),
    /// Server error.
    ErrorResponse(ErrorFields),
    /// Server warning/notice; same field layout as an error.
    NoticeResponse(ErrorFields),
    /// Asynchronous NOTIFY delivery.
    NotificationResponse(Notification),
    /// Pre-authentication SSL indicator byte ('S' or 'N'), only ever
    /// produced while the stream parser is armed for it.
    SslResponse {
        /// Whether the server is willing to negotiate TLS.
        supported: bool,
    },
}

impl Message {
    /// Encode a frontend message, appending the framed bytes to `out`.
    ///
    /// Backend messages have no frontend encoding; asking for one is an
    /// [`Error::Encode`].
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Message::Startup(startup) => frontend::write_startup(out, &startup.parameters),
            Message::SslRequest => frontend::write_ssl_request(out),
            Message::CancelRequest(cancel) => {
                frontend::write_cancel_request(out, cancel.process_id, cancel.secret_key);
            }
            Message::Password(password) => frontend::write_password(out, &password.password),
            Message::SaslInitialResponse(initial) => {
                frontend::write_sasl_initial_response(out, &initial.mechanism, &initial.data);
            }
            Message::SaslResponse(response) => frontend::write_sasl_response(out, &response.data),
            Message::Query(query) => frontend::write_query(out, &query.query),
            Message::Parse(parse) => {
                frontend::write_parse(out, &parse.statement_name, &parse.query, &parse.parameter_types);
            }
            Message::Bind(bind) => frontend::write_bind(out, bind),
            Message::Describe(describe) => {
                frontend::write_describe(out, describe.target, &describe.name);
            }
            Message::Execute(execute) => {
                frontend::write_execute(out, &execute.portal, execute.max_rows);
            }
            Message::Sync => frontend::write_sync(out),
            Message::Terminate => frontend::write_terminate(out),
            _ => {
                return Err(Error::Encode(format!(
                    "{} is a backend message and cannot be sent",
                    self.kind()
                )));
            }
        }
        Ok(())
    }

    /// Decode one backend message from its type byte and framed payload.
    ///
    /// The caller (the stream parser) has already stripped the length field
    /// and guarantees `payload` is the complete message body.
    pub fn decode(type_byte: u8, payload: &[u8]) -> Result<Message> {
        let message = match type_byte {
            backend::msg_type::AUTHENTICATION => {
                Message::Authentication(backend::parse_authentication(payload)?)
            }
            backend::msg_type::PARAMETER_STATUS => {
                Message::ParameterStatus(backend::parse_parameter_status(payload)?)
            }
            backend::msg_type::BACKEND_KEY_DATA => {
                Message::BackendKeyData(backend::parse_backend_key_data(payload)?)
            }
            backend::msg_type::READY_FOR_QUERY => {
                Message::ReadyForQuery(backend::parse_ready_for_query(payload)?)
            }
            backend::msg_type::ROW_DESCRIPTION => {
                Message::RowDescription(backend::parse_row_description(payload)?)
            }
            backend::msg_type::DATA_ROW => Message::DataRow(backend::parse_data_row(payload)?),
            backend::msg_type::COMMAND_COMPLETE => {
                Message::CommandComplete(backend::parse_command_complete(payload)?)
            }
            backend::msg_type::EMPTY_QUERY_RESPONSE => Message::EmptyQueryResponse,
            backend::msg_type::PARSE_COMPLETE => Message::ParseComplete,
            backend::msg_type::BIND_COMPLETE => Message::BindComplete,
            backend::msg_type::NO_DATA => Message::NoData,
            backend::msg_type::PARAMETER_DESCRIPTION => {
                Message::ParameterDescription(backend::parse_parameter_description(payload)?)
            }
            backend::msg_type::ERROR_RESPONSE => {
                Message::ErrorResponse(backend::parse_error_fields(payload)?)
            }
            backend::msg_type::NOTICE_RESPONSE => {
                Message::NoticeResponse(backend::parse_error_fields(payload)?)
            }
            backend::msg_type::NOTIFICATION_RESPONSE => {
                Message::NotificationResponse(backend::parse_notification(payload)?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unrecognized message type byte: {:?} (0x{:02X})",
                    other as char, other
                )));
            }
        };
        Ok(message)
    }

    /// Short human-readable name, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Startup(_) => "Startup",
            Message::SslRequest => "SSLRequest",
            Message::CancelRequest(_) => "CancelRequest",
            Message::Password(_) => "PasswordMessage",
            Message::SaslInitialResponse(_) => "SASLInitialResponse",
            Message::SaslResponse(_) => "SASLResponse",
            Message::Query(_) => "Query",
            Message::Parse(_) => "Parse",
            Message::Bind(_) => "Bind",
            Message::Describe(_) => "Describe",
            Message::Execute(_) => "Execute",
            Message::Sync => "Sync",
            Message::Terminate => "Terminate",
            Message::Authentication(_) => "Authentication",
            Message::ParameterStatus(_) => "ParameterStatus",
            Message::BackendKeyData(_) => "BackendKeyData",
            Message::ReadyForQuery(_) => "ReadyForQuery",
            Message::RowDescription(_) => "RowDescription",
            Message::DataRow(_) => "DataRow",
            Message::CommandComplete(_) => "CommandComplete",
            Message::EmptyQueryResponse => "EmptyQueryResponse",
            Message::ParseComplete => "ParseComplete",
            Message::BindComplete => "BindComplete",
            Message::NoData => "NoData",
            Message::ParameterDescription(_) => "ParameterDescription",
            Message::ErrorResponse(_) => "ErrorResponse",
            Message::NoticeResponse(_) => "NoticeResponse",
            Message::NotificationResponse(_) => "NotificationResponse",
            Message::SslResponse { .. } => "SSLResponse",
        }
    }
}

/// Startup payload: ordered (key, value) parameter pairs.
///
/// The protocol version is fixed at 3.0; the pair order is preserved on the
/// wire ("user" conventionally first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    pub parameters: Vec<(String, String)>,
}

/// CancelRequest payload: the key material from [`BackendKeyData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelRequest {
    pub process_id: u32,
    pub secret_key: u32,
}

/// PasswordMessage payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password {
    pub password: String,
}

/// SASLInitialResponse payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslInitialResponse {
    pub mechanism: String,
    pub data: Vec<u8>,
}

/// SASLResponse payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslResponse {
    pub data: Vec<u8>,
}

/// Query payload. The string may contain multiple statements separated by
/// semicolons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub query: String,
}

/// Parse payload. An empty statement name is the unnamed statement.
///
/// `parameter_types` declares the OID of each `$n` placeholder; OID 0 lets
/// the server infer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parse {
    pub statement_name: String,
    pub query: String,
    pub parameter_types: Vec<DataType>,
}

/// Bind payload. Parameter values are pre-serialized wire bytes; `None` is
/// SQL NULL (encoded as length -1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub parameter_formats: Vec<FormatCode>,
    pub parameters: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<FormatCode>,
}

/// What a Describe message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    /// A prepared statement ('S').
    Statement,
    /// A bound portal ('P').
    Portal,
}

/// Describe payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Describe {
    pub target: DescribeTarget,
    pub name: String,
}

/// Execute payload. `max_rows` 0 means no limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub portal: String,
    pub max_rows: i32,
}

/// Authentication message family, switched on the payload's Int32 code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Authentication succeeded.
    Ok,
    /// Server wants the password in cleartext.
    CleartextPassword,
    /// Server wants an MD5 digest computed with this salt.
    Md5Password { salt: [u8; 4] },
    /// Server offers these SASL mechanisms.
    Sasl { mechanisms: Vec<String> },
    /// SASL challenge (server-first-message).
    SaslContinue { data: Vec<u8> },
    /// SASL outcome (server-final-message).
    SaslFinal { data: Vec<u8> },
    /// A scheme this client does not implement (Kerberos, GSS, SSPI, ...).
    Other(i32),
}

/// ParameterStatus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

/// BackendKeyData payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    pub process_id: u32,
    pub secret_key: u32,
}

/// ReadyForQuery payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

/// Metadata for one column of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    /// Column name.
    pub name: String,
    /// OID of the owning table, or 0.
    pub table_oid: Oid,
    /// Attribute number within the table, or 0.
    pub column_id: i16,
    /// Column data type.
    pub data_type: DataType,
    /// pg_type.typlen: negative for variable-width types.
    pub type_size: i16,
    /// Type-specific modifier (e.g. varchar length).
    pub type_modifier: i32,
    /// Format the server will use for this column's DataRow values.
    pub format: FormatCode,
}

/// RowDescription payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

/// DataRow payload: one entry per column, `None` for SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub columns: Vec<Option<Vec<u8>>>,
}

/// CommandComplete payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    /// Number of rows the completed command affected, per the tag.
    ///
    /// INSERT tags carry a leading OID word: `INSERT 0 5`.
    pub fn rows_affected(&self) -> u64 {
        let mut words = self.tag.split_ascii_whitespace();
        let rows = match words.next() {
            Some("INSERT") => words.nth(1),
            Some("SELECT" | "UPDATE" | "DELETE" | "MOVE" | "FETCH" | "COPY") => words.next(),
            _ => None,
        };
        rows.and_then(|n| n.parse().ok()).unwrap_or(0)
    }
}

/// ParameterDescription payload: one OID per statement placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    pub types: Vec<DataType>,
}

/// NotificationResponse payload (LISTEN/NOTIFY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub process_id: u32,
    pub channel: String,
    pub payload: String,
}
