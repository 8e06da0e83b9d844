//! Protocol constants for the Hot Rod binary protocol.

/// Magic byte opening every request.
pub const REQUEST_MAGIC: u8 = 0xA0;

/// Magic byte opening every response and server-pushed event.
pub const RESPONSE_MAGIC: u8 = 0xA1;

/// Protocol version this client speaks by default.
pub const DEFAULT_PROTOCOL_VERSION: u8 = 20;

/// Default port of a Hot Rod server.
pub const DEFAULT_PORT: u16 = 11222;

/// Name the server uses for the default cache.
pub const DEFAULT_CACHE_NAME: &str = "";

// Request opcodes.

/// Store a value.
pub const PUT_REQUEST: u8 = 0x01;
/// Read a value.
pub const GET_REQUEST: u8 = 0x03;
/// Store a value unless the key is present.
pub const PUT_IF_ABSENT_REQUEST: u8 = 0x05;
/// Store a value only if the key is present.
pub const REPLACE_REQUEST: u8 = 0x07;
/// Store a value only if the version matches.
pub const REPLACE_IF_UNMODIFIED_REQUEST: u8 = 0x09;
/// Remove a key.
pub const REMOVE_REQUEST: u8 = 0x0B;
/// Remove a key only if the version matches.
pub const REMOVE_IF_UNMODIFIED_REQUEST: u8 = 0x0D;
/// Check whether a key is present.
pub const CONTAINS_KEY_REQUEST: u8 = 0x0F;
/// Read a value together with its version.
pub const GET_WITH_VERSION_REQUEST: u8 = 0x11;
/// Remove every entry of a cache.
pub const CLEAR_REQUEST: u8 = 0x13;
/// Read server statistics.
pub const STATS_REQUEST: u8 = 0x15;
/// Liveness check.
pub const PING_REQUEST: u8 = 0x17;
/// Read a value with version and expiration metadata.
pub const GET_WITH_METADATA_REQUEST: u8 = 0x1B;
/// Register a client listener.
pub const ADD_CLIENT_LISTENER_REQUEST: u8 = 0x25;
/// Unregister a client listener.
pub const REMOVE_CLIENT_LISTENER_REQUEST: u8 = 0x27;
/// Count the entries of a cache.
pub const SIZE_REQUEST: u8 = 0x29;

// Response opcodes.

/// Response to [`PUT_REQUEST`].
pub const PUT_RESPONSE: u8 = 0x02;
/// Response to [`GET_REQUEST`].
pub const GET_RESPONSE: u8 = 0x04;
/// Response to [`PUT_IF_ABSENT_REQUEST`].
pub const PUT_IF_ABSENT_RESPONSE: u8 = 0x06;
/// Response to [`REPLACE_REQUEST`].
pub const REPLACE_RESPONSE: u8 = 0x08;
/// Response to [`REPLACE_IF_UNMODIFIED_REQUEST`].
pub const REPLACE_IF_UNMODIFIED_RESPONSE: u8 = 0x0A;
/// Response to [`REMOVE_REQUEST`].
pub const REMOVE_RESPONSE: u8 = 0x0C;
/// Response to [`REMOVE_IF_UNMODIFIED_REQUEST`].
pub const REMOVE_IF_UNMODIFIED_RESPONSE: u8 = 0x0E;
/// Response to [`CONTAINS_KEY_REQUEST`].
pub const CONTAINS_KEY_RESPONSE: u8 = 0x10;
/// Response to [`GET_WITH_VERSION_REQUEST`].
pub const GET_WITH_VERSION_RESPONSE: u8 = 0x12;
/// Response to [`CLEAR_REQUEST`].
pub const CLEAR_RESPONSE: u8 = 0x14;
/// Response to [`STATS_REQUEST`].
pub const STATS_RESPONSE: u8 = 0x16;
/// Response to [`PING_REQUEST`].
pub const PING_RESPONSE: u8 = 0x18;
/// Response to [`GET_WITH_METADATA_REQUEST`].
pub const GET_WITH_METADATA_RESPONSE: u8 = 0x1C;
/// Response to [`ADD_CLIENT_LISTENER_REQUEST`].
pub const ADD_CLIENT_LISTENER_RESPONSE: u8 = 0x26;
/// Response to [`REMOVE_CLIENT_LISTENER_REQUEST`].
pub const REMOVE_CLIENT_LISTENER_RESPONSE: u8 = 0x28;
/// Response to [`SIZE_REQUEST`].
pub const SIZE_RESPONSE: u8 = 0x2A;
/// Generic error response, replaces the expected opcode.
pub const ERROR_RESPONSE: u8 = 0x50;

// Server-pushed events.

/// An entry was created.
pub const CACHE_ENTRY_CREATED_EVENT: u8 = 0x60;
/// An entry was modified.
pub const CACHE_ENTRY_MODIFIED_EVENT: u8 = 0x61;
/// An entry was removed.
pub const CACHE_ENTRY_REMOVED_EVENT: u8 = 0x62;
/// An entry expired.
pub const CACHE_ENTRY_EXPIRED_EVENT: u8 = 0x63;

// Status codes.

/// The operation succeeded.
pub const NO_ERROR_STATUS: u8 = 0x00;
/// A conditional operation was not executed.
pub const NOT_PUT_REMOVED_REPLACED_STATUS: u8 = 0x01;
/// The key does not exist.
pub const KEY_DOES_NOT_EXIST_STATUS: u8 = 0x02;
/// Success, the previous value follows.
pub const SUCCESS_WITH_PREVIOUS: u8 = 0x03;
/// Not executed, the previous value follows.
pub const NOT_EXECUTED_WITH_PREVIOUS: u8 = 0x04;
/// Invalid magic byte or message id.
pub const INVALID_MAGIC_OR_MESSAGE_ID_STATUS: u8 = 0x81;
/// Unknown opcode.
pub const REQUEST_PARSING_ERROR_STATUS_UNKNOWN_COMMAND: u8 = 0x82;
/// Unknown protocol version.
pub const UNKNOWN_VERSION_STATUS: u8 = 0x83;
/// Malformed request.
pub const REQUEST_PARSING_ERROR_STATUS: u8 = 0x84;
/// Generic server failure.
pub const SERVER_ERROR_STATUS: u8 = 0x85;
/// The command did not complete in time on the server.
pub const COMMAND_TIMEOUT_STATUS: u8 = 0x86;

// Request flags, OR-ed into the header's flags field.

/// Return the previous value from write operations.
pub const FLAG_FORCE_RETURN_VALUE: u32 = 0x01;
/// Use the server's default lifespan.
pub const FLAG_DEFAULT_LIFESPAN: u32 = 0x02;
/// Use the server's default max idle.
pub const FLAG_DEFAULT_MAXIDLE: u32 = 0x04;
/// Skip loading from a cache store.
pub const FLAG_SKIP_CACHE_LOAD: u32 = 0x08;
/// Skip indexing the written entry.
pub const FLAG_SKIP_INDEXING: u32 = 0x10;

// Client intelligence levels.

/// No topology awareness.
pub const CLIENT_INTELLIGENCE_BASIC: u8 = 0x01;
/// Tracks the server list.
pub const CLIENT_INTELLIGENCE_TOPOLOGY_AWARE: u8 = 0x02;
/// Tracks segment ownership.
pub const CLIENT_INTELLIGENCE_HASH_DISTRIBUTION_AWARE: u8 = 0x03;

/// Topology id a client sends before it has seen any topology.
pub const DEFAULT_CLUSTER_TOPOLOGY: i32 = -1;

/// Topology id installed right after switching clusters.
pub const SWITCH_CLUSTER_TOPOLOGY: i32 = -2;

/// Marker in a server error message reporting a node that left the cluster.
pub const NODE_SUSPECTED: &str = "SuspectException";

/// Marker in a server error message reporting a node that is shutting down.
pub const ILLEGAL_LIFECYCLE_STATE: &str = "IllegalLifecycleStateException";

/// Whether the status byte denotes an error response.
pub fn is_error_status(status: u8) -> bool {
    (INVALID_MAGIC_OR_MESSAGE_ID_STATUS..=COMMAND_TIMEOUT_STATUS).contains(&status)
}

/// Whether a response with this status carries the previous value.
pub fn has_previous_value(status: u8) -> bool {
    status == SUCCESS_WITH_PREVIOUS || status == NOT_EXECUTED_WITH_PREVIOUS
}

/// Whether the operation took effect.
pub fn is_success(status: u8) -> bool {
    status == NO_ERROR_STATUS || status == SUCCESS_WITH_PREVIOUS
}

/// Whether a conditional operation was rejected.
pub fn is_not_executed(status: u8) -> bool {
    status == NOT_PUT_REMOVED_REPLACED_STATUS || status == NOT_EXECUTED_WITH_PREVIOUS
}

/// Human readable name of a status byte.
pub fn status_name(status: u8) -> &'static str {
    match status {
        NO_ERROR_STATUS => "NO_ERROR",
        NOT_PUT_REMOVED_REPLACED_STATUS => "NOT_PUT_REMOVED_REPLACED",
        KEY_DOES_NOT_EXIST_STATUS => "KEY_DOES_NOT_EXIST",
        SUCCESS_WITH_PREVIOUS => "SUCCESS_WITH_PREVIOUS",
        NOT_EXECUTED_WITH_PREVIOUS => "NOT_EXECUTED_WITH_PREVIOUS",
        INVALID_MAGIC_OR_MESSAGE_ID_STATUS => "INVALID_MAGIC_OR_MESSAGE_ID",
        REQUEST_PARSING_ERROR_STATUS_UNKNOWN_COMMAND => "UNKNOWN_COMMAND",
        UNKNOWN_VERSION_STATUS => "UNKNOWN_VERSION",
        REQUEST_PARSING_ERROR_STATUS => "REQUEST_PARSING_ERROR",
        SERVER_ERROR_STATUS => "SERVER_ERROR",
        COMMAND_TIMEOUT_STATUS => "COMMAND_TIMEOUT",
        _ => "UNKNOWN_STATUS",
    }
}

/// Maps a request opcode to the opcode its response must carry.
pub fn response_opcode_for(request: u8) -> Option<u8> {
    match request {
        PUT_REQUEST
        | GET_REQUEST
        | PUT_IF_ABSENT_REQUEST
        | REPLACE_REQUEST
        | REPLACE_IF_UNMODIFIED_REQUEST
        | REMOVE_REQUEST
        | REMOVE_IF_UNMODIFIED_REQUEST
        | CONTAINS_KEY_REQUEST
        | GET_WITH_VERSION_REQUEST
        | CLEAR_REQUEST
        | STATS_REQUEST
        | PING_REQUEST
        | GET_WITH_METADATA_REQUEST
        | ADD_CLIENT_LISTENER_REQUEST
        | REMOVE_CLIENT_LISTENER_REQUEST
        | SIZE_REQUEST => Some(request + 1),
        _ => None,
    }
}

/// Whether the opcode is a server-pushed cache entry event.
pub fn is_event_opcode(opcode: u8) -> bool {
    (CACHE_ENTRY_CREATED_EVENT..=CACHE_ENTRY_EXPIRED_EVENT).contains(&opcode)
}
