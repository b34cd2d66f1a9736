use cosem_core::{CosemError, CosemResult};

const SERVICE_CLASS_CONFIRMED: u8 = 0x40;
const HIGH_PRIORITY: u8 = 0x80;

/// The `invoke-id-and-priority` byte of every confirmed service PDU.
///
/// Low nibble: invoke-id 0..15. Bit 6: service class (always confirmed
/// for this client). Bit 7: priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeIdAndPriority(u8);

impl InvokeIdAndPriority {
    pub fn new(invoke_id: u8, high_priority: bool) -> CosemResult<Self> {
        if invoke_id > 0x0F {
            return Err(CosemError::Protocol(format!(
                "invoke-id {} does not fit four bits",
                invoke_id
            )));
        }
        let mut byte = invoke_id | SERVICE_CLASS_CONFIRMED;
        if high_priority {
            byte |= HIGH_PRIORITY;
        }
        Ok(Self(byte))
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn byte(&self) -> u8 {
        self.0
    }

    pub fn invoke_id(&self) -> u8 {
        self.0 & 0x0F
    }

    pub fn is_high_priority(&self) -> bool {
        self.0 & HIGH_PRIORITY != 0
    }
}
