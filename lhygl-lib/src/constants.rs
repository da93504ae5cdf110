// Wire constants for the LHYMICRO-GL protocol

/// Total size of one transmission frame
pub const FRAME_SIZE: usize = 34;

/// Payload slots per frame (bytes 2..32)
pub const FRAME_PAYLOAD_SIZE: usize = 30;

/// Framing marker, first and second-to-last byte of every frame
pub const FRAME_MARKER: u8 = 0xA6;

/// Second byte of every frame
pub const FRAME_HEADER_PAD: u8 = 0x00;

/// Filler for unused payload slots
pub const FRAME_FILLER: u8 = 0x46;

/// One-byte status query sent on the bulk-OUT endpoint
pub const STATUS_QUERY: u8 = 0xA0;

/// Length of the status read on the bulk-IN endpoint; status code is byte 1
pub const STATUS_READ_SIZE: usize = 6;

// Direction bytes (stepper axes)
pub const DIR_RIGHT: u8 = b'B';
pub const DIR_LEFT: u8 = b'T';
pub const DIR_UP: u8 = b'L';
pub const DIR_DOWN: u8 = b'R';
pub const DIR_ANGLE: u8 = b'M';

// Laser control
pub const LASER_ON: u8 = b'D';
pub const LASER_OFF: u8 = b'U';

// Job control vocabulary
pub const CMD_BEGIN: u8 = b'I';
pub const CMD_NEXT: u8 = b'N';
pub const CMD_BEGIN_BUFFER: u8 = b'B';
pub const CMD_FINISH: u8 = b'F';
pub const CMD_PAUSE_SPEED: u8 = b'@';

/// Ready handshake asserted before cutting starts or resumes
pub const READY_SEQUENCE: &[u8] = b"S1E";

/// Unlock-rail command sequence
pub const UNLOCK_SEQUENCE: &[u8] = b"IS2P";

/// Home command sequence
pub const HOME_SEQUENCE: &[u8] = b"IPP";

/// Emergency-stop command (interrupts whatever the controller is doing)
pub const STOP_SEQUENCE: &[u8] = b"I";

/// Distance alphabet: one byte worth 255 ticks
pub const DIST_255: u8 = 122;

/// Distance alphabet: escape prefix for the 26..=51 range
pub const DIST_ESCAPE: u8 = 124;
