/// The payload of a write request. Interpretation of `action` and
/// `data` is entirely handler-defined; the core only threads it
/// through to `DeviceHandler::write`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteData {
    pub action: String,
    pub data: WritePayload,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    Bytes(Vec<u8>),
    Strings(Vec<String>),
}
