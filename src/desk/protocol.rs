use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/// Uplift BLE service and characteristic UUIDs
/// (Jiecang controller boxes shipped in Uplift V2 desks)

// Primary service advertised by the desk
pub const DESK_SERVICE_UUID: Uuid = uuid_from_u16(0xff12);

// Characteristic commands are written to
pub const DATA_IN_UUID: Uuid = uuid_from_u16(0xff01);

// Characteristic the desk notifies height reports on
pub const DATA_OUT_UUID: Uuid = uuid_from_u16(0xff02);

const COMMAND_HEADER: [u8; 2] = [0xf1, 0xf1];
const NOTIFY_HEADER: [u8; 2] = [0xf2, 0xf2];
const FRAME_END: u8 = 0x7e;

const REPORT_HEIGHT: u8 = 0x01;

/// One of the four memory positions stored on the desk controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    One,
    Two,
    Three,
    Four,
}

impl Preset {
    /// Sitting position as programmed by the desk keypad
    pub const SIT: Preset = Preset::One;
    /// Standing position as programmed by the desk keypad
    pub const STAND: Preset = Preset::Two;

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            3 => Some(Self::Three),
            4 => Some(Self::Four),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
            Self::Four => 4,
        }
    }
}

/// Commands understood by the desk controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskCommand {
    /// Wake the controller so it accepts movement commands
    Wake,
    /// Halt a movement in progress
    Stop,
    /// Ask the desk to report its current height
    QueryHeight,
    /// Move to a stored preset
    MoveToPreset(Preset),
}

impl DeskCommand {
    fn opcode(&self) -> u8 {
        match self {
            Self::Wake => 0x00,
            Self::QueryHeight => 0x07,
            Self::Stop => 0x2b,
            Self::MoveToPreset(Preset::One) => 0x05,
            Self::MoveToPreset(Preset::Two) => 0x06,
            Self::MoveToPreset(Preset::Three) => 0x27,
            Self::MoveToPreset(Preset::Four) => 0x28,
        }
    }

    /// Convert command to a framed packet for BLE transmission
    /// Format: [0xF1, 0xF1, opcode, len, payload.., checksum, 0x7E]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_frame(COMMAND_HEADER, self.opcode(), &[])
    }
}

fn checksum(command: u8, payload: &[u8]) -> u8 {
    payload
        .iter()
        .fold(command.wrapping_add(payload.len() as u8), |acc, b| {
            acc.wrapping_add(*b)
        })
}

fn encode_frame(header: [u8; 2], command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.extend_from_slice(&header);
    frame.push(command);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(command, payload));
    frame.push(FRAME_END);
    frame
}

/// A decoded notification from the desk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Current height in millimetres
    Height(u16),
    /// Any report this crate does not interpret
    Other { command: u8, payload: Vec<u8> },
}

impl Report {
    fn from_frame(command: u8, payload: &[u8]) -> Self {
        match (command, payload) {
            // Height is big-endian, in 0.1mm units
            (REPORT_HEIGHT, [hi, lo, ..]) => Self::Height(u16::from_be_bytes([*hi, *lo]) / 10),
            _ => Self::Other {
                command,
                payload: payload.to_vec(),
            },
        }
    }
}

/// Reassembles notification frames that the desk may split across
/// or pack into a single BLE notification
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw notification bytes, returning every complete report
    pub fn push(&mut self, data: &[u8]) -> Vec<Report> {
        self.buf.extend_from_slice(data);
        let mut reports = Vec::new();

        loop {
            match self.buf.windows(2).position(|w| w == NOTIFY_HEADER) {
                Some(start) => {
                    self.buf.drain(..start);
                }
                None => {
                    // Keep a trailing half header for the next notification
                    let keep = self.buf.last() == Some(&NOTIFY_HEADER[0]);
                    self.buf.clear();
                    if keep {
                        self.buf.push(NOTIFY_HEADER[0]);
                    }
                    break;
                }
            }

            if self.buf.len() < 4 {
                break;
            }

            let len = self.buf[3] as usize;
            let total = len + 6;
            if self.buf.len() < total {
                break;
            }

            let command = self.buf[2];
            let payload = &self.buf[4..4 + len];
            if self.buf[total - 1] == FRAME_END && self.buf[total - 2] == checksum(command, payload) {
                reports.push(Report::from_frame(command, payload));
                self.buf.drain(..total);
            } else {
                log::debug!("Dropping malformed frame: {:02X?}", &self.buf[..total]);
                self.buf.drain(..2);
            }
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn height_frame(tenths_mm: u16) -> Vec<u8> {
        let [hi, lo] = tenths_mm.to_be_bytes();
        encode_frame(NOTIFY_HEADER, REPORT_HEIGHT, &[hi, lo, 0x00])
    }

    #[test]
    fn test_command_frames() {
        assert_eq!(
            DeskCommand::MoveToPreset(Preset::SIT).to_bytes(),
            vec![0xf1, 0xf1, 0x05, 0x00, 0x05, 0x7e]
        );
        assert_eq!(
            DeskCommand::MoveToPreset(Preset::STAND).to_bytes(),
            vec![0xf1, 0xf1, 0x06, 0x00, 0x06, 0x7e]
        );
        assert_eq!(
            DeskCommand::QueryHeight.to_bytes(),
            vec![0xf1, 0xf1, 0x07, 0x00, 0x07, 0x7e]
        );
        assert_eq!(
            DeskCommand::Stop.to_bytes(),
            vec![0xf1, 0xf1, 0x2b, 0x00, 0x2b, 0x7e]
        );
        assert_eq!(
            DeskCommand::Wake.to_bytes(),
            vec![0xf1, 0xf1, 0x00, 0x00, 0x00, 0x7e]
        );
    }

    #[test]
    fn test_height_frame_bytes() {
        // 762mm = 7620 tenths = 0x1DC4
        assert_eq!(
            height_frame(7620),
            vec![0xf2, 0xf2, 0x01, 0x03, 0x1d, 0xc4, 0x00, 0xe5, 0x7e]
        );
    }

    #[test]
    fn test_preset_numbers() {
        assert_eq!(Preset::from_number(3), Some(Preset::Three));
        assert_eq!(Preset::from_number(0), None);
        assert_eq!(Preset::from_number(5), None);
        assert_eq!(Preset::Four.number(), 4);
    }

    #[test]
    fn test_decode_single_report() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.push(&height_frame(7620)), vec![Report::Height(762)]);
    }

    #[test]
    fn test_decode_split_and_packed_reports() {
        let mut decoder = FrameDecoder::new();
        let first = height_frame(7000);
        let second = height_frame(7100);

        assert!(decoder.push(&first[..5]).is_empty());
        let mut rest = first[5..].to_vec();
        rest.extend_from_slice(&second);
        assert_eq!(
            decoder.push(&rest),
            vec![Report::Height(700), Report::Height(710)]
        );
    }

    #[test]
    fn test_decode_skips_noise_and_bad_checksum() {
        let mut decoder = FrameDecoder::new();
        let mut corrupt = height_frame(7000);
        corrupt[7] ^= 0xff;

        let mut data = vec![0x00, 0x13];
        data.extend_from_slice(&corrupt);
        data.extend_from_slice(&height_frame(7200));
        assert_eq!(decoder.push(&data), vec![Report::Height(720)]);
    }

    #[test]
    fn test_decode_keeps_trailing_half_header() {
        let mut decoder = FrameDecoder::new();
        let frame = height_frame(7620);
        assert!(decoder.push(&[0x55, frame[0]]).is_empty());
        assert_eq!(decoder.push(&frame[1..]), vec![Report::Height(762)]);
    }

    #[test]
    fn test_decode_other_report() {
        let mut decoder = FrameDecoder::new();
        let frame = encode_frame(NOTIFY_HEADER, 0x10, &[0x01]);
        assert_eq!(
            decoder.push(&frame),
            vec![Report::Other { command: 0x10, payload: vec![0x01] }]
        );
    }
}
