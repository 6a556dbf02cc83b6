//! Frontend (client-to-server) message encoders.
//!
//! Every encoder appends one framed message to the output buffer. The
//! startup-family messages (Startup, SSLRequest, CancelRequest) carry no type
//! byte; everything else is `[type byte][Int32 length][payload]` with the
//! length backpatched by [`MessageBuilder::finish`].

use super::codec::MessageBuilder;
use super::message::{Bind, DescribeTarget};
use super::types::DataType;

/// Frontend message type bytes.
pub mod msg_type {
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
}

/// Protocol version 3.0: major 3 in the high 16 bits, minor 0 in the low.
pub const PROTOCOL_VERSION_3_0: i32 = 0x0003_0000;

/// Magic "version" carried by an SSLRequest message.
pub const SSL_REQUEST_CODE: i32 = 80877103;

/// Magic "version" carried by a CancelRequest message.
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Write a startup message: version, (key, value) pairs in order, then a
/// terminating zero byte.
pub fn write_startup(out: &mut Vec<u8>, parameters: &[(String, String)]) {
    let mut msg = MessageBuilder::new_untyped(out);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (key, value) in parameters {
        msg.write_cstr(key);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish();
}

/// Write an SSLRequest message.
pub fn write_ssl_request(out: &mut Vec<u8>) {
    let mut msg = MessageBuilder::new_untyped(out);
    msg.write_i32(SSL_REQUEST_CODE);
    msg.finish();
}

/// Write a CancelRequest message. Sent on a connection of its own, never on
/// the session being cancelled.
pub fn write_cancel_request(out: &mut Vec<u8>, process_id: u32, secret_key: u32) {
    let mut msg = MessageBuilder::new_untyped(out);
    msg.write_i32(CANCEL_REQUEST_CODE);
    msg.write_u32(process_id);
    msg.write_u32(secret_key);
    msg.finish();
}

/// Write a PasswordMessage (cleartext or MD5 digest string).
pub fn write_password(out: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(out, msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse: mechanism name plus length-prefixed
/// client-first-message.
pub fn write_sasl_initial_response(out: &mut Vec<u8>, mechanism: &str, data: &[u8]) {
    let mut msg = MessageBuilder::new(out, msg_type::PASSWORD);
    msg.write_cstr(mechanism);
    msg.write_i32(data.len() as i32);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a SASLResponse: the raw client-final-message.
pub fn write_sasl_response(out: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(out, msg_type::PASSWORD);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by
/// semicolons.
pub fn write_query(out: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(out, msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a Parse message declaring the type OID of each placeholder (OID 0
/// lets the server infer).
pub fn write_parse(out: &mut Vec<u8>, statement_name: &str, query: &str, parameter_types: &[DataType]) {
    let mut msg = MessageBuilder::new(out, msg_type::PARSE);
    msg.write_cstr(statement_name);
    msg.write_cstr(query);
    msg.write_i16(parameter_types.len() as i16);
    for data_type in parameter_types {
        msg.write_u32(data_type.oid());
    }
    msg.finish();
}

/// Write a Bind message. Parameter values are already wire bytes; `None` is
/// SQL NULL and encodes as length -1 with no payload.
pub fn write_bind(out: &mut Vec<u8>, bind: &Bind) {
    let mut msg = MessageBuilder::new(out, msg_type::BIND);
    msg.write_cstr(&bind.portal);
    msg.write_cstr(&bind.statement);
    msg.write_i16(bind.parameter_formats.len() as i16);
    for format in &bind.parameter_formats {
        msg.write_u16(*format as u16);
    }
    msg.write_i16(bind.parameters.len() as i16);
    for parameter in &bind.parameters {
        match parameter {
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
            None => msg.write_i32(-1),
        }
    }
    msg.write_i16(bind.result_formats.len() as i16);
    for format in &bind.result_formats {
        msg.write_u16(*format as u16);
    }
    msg.finish();
}

/// Write a Describe message for a prepared statement ('S') or portal ('P').
pub fn write_describe(out: &mut Vec<u8>, target: DescribeTarget, name: &str) {
    let mut msg = MessageBuilder::new(out, msg_type::DESCRIBE);
    msg.write_u8(match target {
        DescribeTarget::Statement => b'S',
        DescribeTarget::Portal => b'P',
    });
    msg.write_cstr(name);
    msg.finish();
}

/// Write an Execute message. `max_rows` 0 means unlimited.
pub fn write_execute(out: &mut Vec<u8>, portal: &str, max_rows: i32) {
    let mut msg = MessageBuilder::new(out, msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows);
    msg.finish();
}

/// Write a Sync message.
pub fn write_sync(out: &mut Vec<u8>) {
    MessageBuilder::new(out, msg_type::SYNC).finish();
}

/// Write a Terminate message.
pub fn write_terminate(out: &mut Vec<u8>) {
    MessageBuilder::new(out, msg_type::TERMINATE).finish();
}
