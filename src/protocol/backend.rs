//! Backend (server-to-client) message decoders.
//!
//! Each function decodes one message body. The stream parser has already
//! validated the frame length, so `payload` is exactly the bytes after the
//! Int32 length field. Trailing bytes a newer server might append are
//! ignored rather than rejected.

use crate::error::{Error, ErrorFields, Result};

use super::codec::{read_bytes, read_cstr, read_i16, read_i32, read_u8, read_u16, read_u32};
use super::message::{
    Authentication, BackendKeyData, CommandComplete, DataRow, FieldDescription, Notification,
    ParameterDescription, ParameterStatus, ReadyForQuery, RowDescription,
};
use super::types::{DataType, FormatCode, TransactionStatus};

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const NO_DATA: u8 = b'n';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
}

/// Authentication sub-protocol codes (the payload's leading Int32).
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Error/notice field type bytes.
pub mod field_type {
    pub const SEVERITY: u8 = b'S';
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    pub const CODE: u8 = b'C';
    pub const MESSAGE: u8 = b'M';
    pub const DETAIL: u8 = b'D';
    pub const HINT: u8 = b'H';
    pub const POSITION: u8 = b'P';
    pub const INTERNAL_POSITION: u8 = b'p';
    pub const INTERNAL_QUERY: u8 = b'q';
    pub const WHERE: u8 = b'W';
    pub const SCHEMA: u8 = b's';
    pub const TABLE: u8 = b't';
    pub const COLUMN: u8 = b'c';
    pub const DATA_TYPE: u8 = b'd';
    pub const CONSTRAINT: u8 = b'n';
    pub const FILE: u8 = b'F';
    pub const LINE: u8 = b'L';
    pub const ROUTINE: u8 = b'R';
}

/// Parse an Authentication message, switching on its code.
pub fn parse_authentication(payload: &[u8]) -> Result<Authentication> {
    let (code, rest) = read_i32(payload)?;
    let auth = match code {
        auth_code::OK => Authentication::Ok,
        auth_code::CLEARTEXT_PASSWORD => Authentication::CleartextPassword,
        auth_code::MD5_PASSWORD => {
            let (salt, _) = read_bytes(rest, 4)?;
            let mut out = [0u8; 4];
            out.copy_from_slice(salt);
            Authentication::Md5Password { salt: out }
        }
        auth_code::SASL => {
            // List of mechanism names, each a cstring, ending with an empty byte.
            let mut mechanisms = Vec::new();
            let mut rest = rest;
            while let Some(&next) = rest.first() {
                if next == 0 {
                    break;
                }
                let (mechanism, after) = read_cstr(rest)?;
                mechanisms.push(mechanism.to_string());
                rest = after;
            }
            Authentication::Sasl { mechanisms }
        }
        auth_code::SASL_CONTINUE => Authentication::SaslContinue {
            data: rest.to_vec(),
        },
        auth_code::SASL_FINAL => Authentication::SaslFinal {
            data: rest.to_vec(),
        },
        other => Authentication::Other(other),
    };
    Ok(auth)
}

/// Parse a ParameterStatus message.
pub fn parse_parameter_status(payload: &[u8]) -> Result<ParameterStatus> {
    let (name, rest) = read_cstr(payload)?;
    let (value, _) = read_cstr(rest)?;
    Ok(ParameterStatus {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parse a BackendKeyData message.
pub fn parse_backend_key_data(payload: &[u8]) -> Result<BackendKeyData> {
    let (process_id, rest) = read_u32(payload)?;
    let (secret_key, _) = read_u32(rest)?;
    Ok(BackendKeyData {
        process_id,
        secret_key,
    })
}

/// Parse a ReadyForQuery message.
pub fn parse_ready_for_query(payload: &[u8]) -> Result<ReadyForQuery> {
    let (byte, _) = read_u8(payload)?;
    let status = TransactionStatus::from_byte(byte).ok_or_else(|| {
        Error::Protocol(format!("unknown transaction status: {:?}", byte as char))
    })?;
    Ok(ReadyForQuery { status })
}

/// Parse a RowDescription message: Int16 field count, then per field the
/// name and six fixed-width metadata values.
pub fn parse_row_description(payload: &[u8]) -> Result<RowDescription> {
    let (count, mut rest) = read_i16(payload)?;
    if count < 0 {
        return Err(Error::Protocol(format!("negative field count: {count}")));
    }
    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (name, after) = read_cstr(rest)?;
        let (table_oid, after) = read_u32(after)?;
        let (column_id, after) = read_i16(after)?;
        let (type_oid, after) = read_u32(after)?;
        let (type_size, after) = read_i16(after)?;
        let (type_modifier, after) = read_i32(after)?;
        let (format, after) = read_u16(after)?;
        fields.push(FieldDescription {
            name: name.to_string(),
            table_oid,
            column_id,
            data_type: DataType(type_oid),
            type_size,
            type_modifier,
            format: FormatCode::from_u16(format),
        });
        rest = after;
    }
    Ok(RowDescription { fields })
}

/// Parse a DataRow message: Int16 column count, then per column an Int32
/// length and that many bytes. Length -1 is SQL NULL and carries no bytes.
pub fn parse_data_row(payload: &[u8]) -> Result<DataRow> {
    let (count, mut rest) = read_i16(payload)?;
    if count < 0 {
        return Err(Error::Protocol(format!("negative column count: {count}")));
    }
    let mut columns = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (len, after) = read_i32(rest)?;
        if len == -1 {
            columns.push(None);
            rest = after;
        } else if len < 0 {
            return Err(Error::Protocol(format!("negative column length: {len}")));
        } else {
            let (bytes, after) = read_bytes(after, len as usize)?;
            columns.push(Some(bytes.to_vec()));
            rest = after;
        }
    }
    Ok(DataRow { columns })
}

/// Parse a CommandComplete message.
pub fn parse_command_complete(payload: &[u8]) -> Result<CommandComplete> {
    let (tag, _) = read_cstr(payload)?;
    Ok(CommandComplete {
        tag: tag.to_string(),
    })
}

/// Parse a ParameterDescription message: Int16 count, then one OID per
/// statement placeholder.
pub fn parse_parameter_description(payload: &[u8]) -> Result<ParameterDescription> {
    let (count, mut rest) = read_i16(payload)?;
    if count < 0 {
        return Err(Error::Protocol(format!("negative parameter count: {count}")));
    }
    let mut types = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (oid, after) = read_u32(rest)?;
        types.push(DataType(oid));
        rest = after;
    }
    Ok(ParameterDescription { types })
}

/// Parse the field list shared by ErrorResponse and NoticeResponse:
/// repeated (field type byte, cstring value) until a zero byte.
pub fn parse_error_fields(payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut rest = payload;
    loop {
        let (field, after) = read_u8(rest)?;
        if field == 0 {
            break;
        }
        let (value, after) = read_cstr(after)?;
        match field {
            field_type::SEVERITY => fields.severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => {
                fields.severity_non_localized = Some(value.to_string());
            }
            field_type::CODE => fields.code = Some(value.to_string()),
            field_type::MESSAGE => fields.message = Some(value.to_string()),
            field_type::DETAIL => fields.detail = Some(value.to_string()),
            field_type::HINT => fields.hint = Some(value.to_string()),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::INTERNAL_POSITION => fields.internal_position = value.parse().ok(),
            field_type::INTERNAL_QUERY => fields.internal_query = Some(value.to_string()),
            field_type::WHERE => fields.where_ = Some(value.to_string()),
            field_type::SCHEMA => fields.schema = Some(value.to_string()),
            field_type::TABLE => fields.table = Some(value.to_string()),
            field_type::COLUMN => fields.column = Some(value.to_string()),
            field_type::DATA_TYPE => fields.data_type = Some(value.to_string()),
            field_type::CONSTRAINT => fields.constraint = Some(value.to_string()),
            field_type::FILE => fields.file = Some(value.to_string()),
            field_type::LINE => fields.line = value.parse().ok(),
            field_type::ROUTINE => fields.routine = Some(value.to_string()),
            other => {
                tracing::debug!("unknown error field type: {}", other as char);
            }
        }
        rest = after;
    }
    Ok(fields)
}

/// Parse a NotificationResponse message.
pub fn parse_notification(payload: &[u8]) -> Result<Notification> {
    let (process_id, rest) = read_u32(payload)?;
    let (channel, rest) = read_cstr(rest)?;
    let (notification_payload, _) = read_cstr(rest)?;
    Ok(Notification {
        process_id,
        channel: channel.to_string(),
        payload: notification_payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_variants() {
        assert_eq!(
            parse_authentication(&0_i32.to_be_bytes()).unwrap(),
            Authentication::Ok
        );
        assert_eq!(
            parse_authentication(&3_i32.to_be_bytes()).unwrap(),
            Authentication::CleartextPassword
        );

        let mut md5 = 5_i32.to_be_bytes().to_vec();
        md5.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(
            parse_authentication(&md5).unwrap(),
            Authentication::Md5Password { salt: [1, 2, 3, 4] }
        );

        let mut sasl = 10_i32.to_be_bytes().to_vec();
        sasl.extend_from_slice(b"SCRAM-SHA-256\0SCRAM-SHA-256-PLUS\0\0");
        assert_eq!(
            parse_authentication(&sasl).unwrap(),
            Authentication::Sasl {
                mechanisms: vec!["SCRAM-SHA-256".into(), "SCRAM-SHA-256-PLUS".into()]
            }
        );

        assert_eq!(
            parse_authentication(&7_i32.to_be_bytes()).unwrap(),
            Authentication::Other(7)
        );
    }

    #[test]
    fn test_parameter_status() {
        let status = parse_parameter_status(b"server_version\x0016.2\0").unwrap();
        assert_eq!(status.name, "server_version");
        assert_eq!(status.value, "16.2");
    }

    #[test]
    fn test_backend_key_data() {
        let mut payload = 42_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&0xDEAD_BEEF_u32.to_be_bytes());
        let key = parse_backend_key_data(&payload).unwrap();
        assert_eq!(key.process_id, 42);
        assert_eq!(key.secret_key, 0xDEAD_BEEF);
    }

    #[test]
    fn test_ready_for_query() {
        assert_eq!(
            parse_ready_for_query(b"I").unwrap().status,
            TransactionStatus::Idle
        );
        assert_eq!(
            parse_ready_for_query(b"T").unwrap().status,
            TransactionStatus::InTransaction
        );
        assert!(parse_ready_for_query(b"?").is_err());
        assert!(parse_ready_for_query(b"").is_err());
    }

    fn row_description_payload() -> Vec<u8> {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"id\0");
        payload.extend_from_slice(&100_u32.to_be_bytes()); // table oid
        payload.extend_from_slice(&1_i16.to_be_bytes()); // column id
        payload.extend_from_slice(&23_u32.to_be_bytes()); // int4
        payload.extend_from_slice(&4_i16.to_be_bytes()); // type size
        payload.extend_from_slice(&(-1_i32).to_be_bytes()); // type modifier
        payload.extend_from_slice(&0_u16.to_be_bytes()); // text format
        payload.extend_from_slice(b"name\0");
        payload.extend_from_slice(&100_u32.to_be_bytes());
        payload.extend_from_slice(&2_i16.to_be_bytes());
        payload.extend_from_slice(&1043_u32.to_be_bytes()); // varchar
        payload.extend_from_slice(&(-1_i16).to_be_bytes());
        payload.extend_from_slice(&(-1_i32).to_be_bytes());
        payload.extend_from_slice(&0_u16.to_be_bytes());
        payload
    }

    #[test]
    fn test_row_description() {
        let desc = parse_row_description(&row_description_payload()).unwrap();
        assert_eq!(desc.fields.len(), 2);
        assert_eq!(desc.fields[0].name, "id");
        assert_eq!(desc.fields[0].data_type, DataType::INT4);
        assert_eq!(desc.fields[0].format, FormatCode::Text);
        assert_eq!(desc.fields[1].name, "name");
        assert_eq!(desc.fields[1].data_type, DataType::VARCHAR);
        assert_eq!(desc.fields[1].type_size, -1);
    }

    #[test]
    fn test_row_description_truncated() {
        let payload = row_description_payload();
        assert!(parse_row_description(&payload[..payload.len() - 3]).is_err());
    }

    #[test]
    fn test_data_row_with_null() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1_i32).to_be_bytes());

        let row = parse_data_row(&payload).unwrap();
        assert_eq!(row.columns.len(), 2);
        assert_eq!(row.columns[0].as_deref(), Some(b"42".as_slice()));
        assert_eq!(row.columns[1], None);
    }

    #[test]
    fn test_data_row_bad_length() {
        let mut payload = 1_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(-2_i32).to_be_bytes());
        assert!(parse_data_row(&payload).is_err());

        let mut payload = 1_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&100_i32.to_be_bytes());
        payload.extend_from_slice(b"short");
        assert!(parse_data_row(&payload).is_err());
    }

    #[test]
    fn test_error_fields() {
        let payload = b"SERROR\0VERROR\0C42P01\0Mrelation \"x\" does not exist\0P15\0\0";
        let fields = parse_error_fields(payload).unwrap();
        assert_eq!(fields.severity.as_deref(), Some("ERROR"));
        assert_eq!(fields.code.as_deref(), Some("42P01"));
        assert_eq!(
            fields.message.as_deref(),
            Some("relation \"x\" does not exist")
        );
        assert_eq!(fields.position, Some(15));
        assert_eq!(fields.hint, None);
    }

    #[test]
    fn test_parameter_description() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&23_u32.to_be_bytes());
        payload.extend_from_slice(&25_u32.to_be_bytes());
        let desc = parse_parameter_description(&payload).unwrap();
        assert_eq!(desc.types, vec![DataType::INT4, DataType::TEXT]);
    }

    #[test]
    fn test_notification() {
        let mut payload = 77_u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"jobs\0run now\0");
        let notification = parse_notification(&payload).unwrap();
        assert_eq!(notification.process_id, 77);
        assert_eq!(notification.channel, "jobs");
        assert_eq!(notification.payload, "run now");
    }
}
