use std::sync::OnceLock;

/// First register address of the telemetry block.
pub const BASE_ADDRESS: u16 = 100;
/// Number of detection channels, one register group each.
pub const GROUP_COUNT: usize = 50;
/// Address distance between consecutive groups.
pub const GROUP_STRIDE: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Counter,
    /// Padding the device keeps in every group. Never read, but it stays in
    /// the map so the following offsets line up with the device layout.
    Reserved,
    Amplitude,
    Phase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int16Be,
    /// Big-endian IEEE-754 float transmitted low word first.
    Float32SwappedBe,
}

impl Encoding {
    pub fn byte_len(&self) -> usize {
        match self {
            Encoding::Int16Be => 2,
            Encoding::Float32SwappedBe => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSlot {
    pub address: u16,
    pub kind: SlotKind,
    pub encoding: Encoding,
}

impl RegisterSlot {
    /// Byte offset of this slot inside the response payload.
    pub fn offset(&self) -> usize {
        (self.address - BASE_ADDRESS) as usize * 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterGroup {
    pub index: usize,
    pub base: u16,
    pub slots: [RegisterSlot; 4],
}

impl RegisterGroup {
    pub fn new(index: usize) -> Self {
        let base = BASE_ADDRESS + GROUP_STRIDE * index as u16;
        let slot = |offset: u16, kind, encoding| RegisterSlot {
            address: base + offset,
            kind,
            encoding,
        };

        Self {
            index,
            base,
            slots: [
                slot(0, SlotKind::Counter, Encoding::Int16Be),
                slot(1, SlotKind::Reserved, Encoding::Int16Be),
                slot(2, SlotKind::Amplitude, Encoding::Float32SwappedBe),
                slot(4, SlotKind::Phase, Encoding::Float32SwappedBe),
            ],
        }
    }

    pub fn slot(&self, kind: SlotKind) -> Option<&RegisterSlot> {
        self.slots.iter().find(|s| s.kind == kind)
    }
}

/// The fixed 50 x 4 telemetry layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    groups: Vec<RegisterGroup>,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterMap {
    pub fn new() -> Self {
        Self {
            groups: (0..GROUP_COUNT).map(RegisterGroup::new).collect(),
        }
    }

    /// Process-wide map, built on first use and never mutated.
    pub fn telemetry() -> &'static RegisterMap {
        static MAP: OnceLock<RegisterMap> = OnceLock::new();
        MAP.get_or_init(RegisterMap::new)
    }

    pub fn groups(&self) -> &[RegisterGroup] {
        &self.groups
    }

    pub fn slots(&self) -> impl Iterator<Item = &RegisterSlot> {
        self.groups.iter().flat_map(|g| g.slots.iter())
    }

    pub fn get_slot(&self, address: u16) -> Option<&RegisterSlot> {
        self.slots().find(|s| s.address == address)
    }

    /// Payload bytes needed to decode every populated slot.
    pub fn payload_len(&self) -> usize {
        self.slots()
            .map(|s| s.offset() + s.encoding.byte_len())
            .max()
            .unwrap_or(0)
    }
}
