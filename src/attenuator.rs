use log::{debug, info, warn};

use crate::config::AttenuatorConfig;
use crate::error::{AttenuatorError, Result};
use crate::protocol::{decode_response, encode_command, Opcode, PACKET_SIZE};
use crate::scpi::{self, Channel, SetAttStatus};
use crate::usb::{self, Transport, UsbTransport};

/// An open session with one attenuator.
///
/// Serial number and model name are read once on connect and cached.
pub struct Attenuator<T: Transport> {
    transport: T,
    serial_number: String,
    model_name: String,
    channel_count: u8,
}

impl<T: Transport> Attenuator<T> {
    pub fn connect(transport: T, channel_count: u8) -> Result<Self> {
        let mut attenuator = Attenuator {
            transport,
            serial_number: String::new(),
            model_name: String::new(),
            channel_count,
        };
        attenuator.serial_number = attenuator.exchange(Opcode::GetSerialNumber, "")?;
        attenuator.model_name = attenuator.exchange(Opcode::GetModelName, "")?;
        info!(
            "Connected to {} (serial {})",
            attenuator.model_name, attenuator.serial_number
        );
        Ok(attenuator)
    }

    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn channel(&self, number: u8) -> Result<Channel> {
        Channel::new(number, self.channel_count)
    }

    pub fn send_scpi(&mut self, command: &str) -> Result<String> {
        self.exchange(Opcode::SendScpi, command)
    }

    pub fn set_attenuation(&mut self, channel: Channel, db: f64) -> Result<SetAttStatus> {
        let command = scpi::set_attenuation(channel, db)?;
        let reply = self.send_scpi(&command)?;
        Ok(SetAttStatus::from_response(&reply))
    }

    pub fn query_attenuation(&mut self, channel: Channel) -> Result<String> {
        self.send_scpi(&scpi::query_attenuation(channel))
    }

    pub fn query_all(&mut self) -> Result<String> {
        self.send_scpi(scpi::query_all())
    }

    fn exchange(&mut self, opcode: Opcode, payload: &str) -> Result<String> {
        let packet = encode_command(opcode, payload)?;
        let written = self.transport.write(&packet)?;
        if written != PACKET_SIZE {
            return Err(AttenuatorError::ShortWrite {
                written,
                expected: PACKET_SIZE,
            });
        }

        let mut response = [0u8; PACKET_SIZE];
        let len = self.transport.read(&mut response)?;
        if len == 0 {
            return Err(AttenuatorError::EmptyResponse);
        }
        let text = decode_response(&response[..len]);
        debug!("{:?} {:?} -> {:?}", opcode, payload, text);
        Ok(text)
    }

    /// Connects to each candidate in turn and returns the first that
    /// identifies itself, or the first whose serial number equals `serial`.
    /// Candidates that fail to open or identify are skipped.
    pub fn select(
        candidates: impl IntoIterator<Item = Result<T>>,
        channel_count: u8,
        serial: Option<&str>,
    ) -> Result<Self> {
        for candidate in candidates {
            let transport = match candidate {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("Skipping device that could not be opened: {}", e);
                    continue;
                }
            };
            let attenuator = match Self::connect(transport, channel_count) {
                Ok(attenuator) => attenuator,
                Err(e) => {
                    warn!("Skipping device that did not identify itself: {}", e);
                    continue;
                }
            };
            match serial {
                Some(wanted) if attenuator.serial_number() != wanted => {
                    debug!("Skipping attenuator with serial {}", attenuator.serial_number());
                }
                _ => return Ok(attenuator),
            }
        }
        Err(AttenuatorError::DeviceNotFound)
    }
}

impl Attenuator<UsbTransport> {
    /// Opens the first attenuator matching the configured IDs, or the one
    /// with the configured serial number when one is set.
    pub fn open(config: &AttenuatorConfig) -> Result<Self> {
        match config.serial.as_deref() {
            Some(serial) => Self::open_by_serial(config, serial),
            None => Self::open_first(config),
        }
    }

    pub fn open_first(config: &AttenuatorConfig) -> Result<Self> {
        let candidates = usb::open_matching(config.vendor_id, config.product_id, config.timeout())?;
        Self::select(candidates, config.channels, None)
    }

    pub fn open_by_serial(config: &AttenuatorConfig, serial: &str) -> Result<Self> {
        let candidates = usb::open_matching(config.vendor_id, config.product_id, config.timeout())?;
        Self::select(candidates, config.channels, Some(serial))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned replies and records every packet written.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub written: Vec<Vec<u8>>,
        pub replies: VecDeque<Vec<u8>>,
        /// Caps how many bytes each write reports as sent.
        pub write_limit: Option<usize>,
    }

    impl ScriptedTransport {
        pub fn with_replies(replies: &[&str]) -> Self {
            let mut transport = ScriptedTransport::default();
            for reply in replies {
                transport.push_reply(reply);
            }
            transport
        }

        pub fn push_reply(&mut self, text: &str) {
            let mut packet = vec![0u8; PACKET_SIZE];
            packet[1..=text.len()].copy_from_slice(text.as_bytes());
            self.replies.push_back(packet);
        }

        pub fn written_text(&self, index: usize) -> String {
            decode_response(&self.written[index])
        }
    }

    impl Transport for ScriptedTransport {
        fn write(&mut self, data: &[u8]) -> Result<usize> {
            self.written.push(data.to_vec());
            Ok(self.write_limit.map_or(data.len(), |limit| limit.min(data.len())))
        }

        fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
            let reply = self
                .replies
                .pop_front()
                .ok_or(AttenuatorError::Usb(rusb::Error::Timeout))?;
            buffer[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        }
    }

    pub fn connected(extra_replies: &[&str]) -> Attenuator<ScriptedTransport> {
        let mut transport = ScriptedTransport::with_replies(&["11811130", "RC4DAT-6G-60"]);
        for reply in extra_replies {
            transport.push_reply(reply);
        }
        Attenuator::connect(transport, 4).unwrap()
    }

    #[test]
    fn test_connect_reads_serial_then_model() {
        let attenuator = connected(&[]);
        assert_eq!(attenuator.serial_number(), "11811130");
        assert_eq!(attenuator.model_name(), "RC4DAT-6G-60");

        let written = &attenuator.transport.written;
        assert_eq!(written.len(), 2);
        assert_eq!(written[0][0], 41);
        assert_eq!(written[1][0], 40);
        assert!(written.iter().all(|p| p.len() == PACKET_SIZE));
    }

    #[test]
    fn test_set_attenuation_frames_scpi_command() {
        let mut attenuator = connected(&["1"]);
        let channel = attenuator.channel(2).unwrap();
        let status = attenuator.set_attenuation(channel, 15.5).unwrap();
        assert_eq!(status, SetAttStatus::Success);

        let packet = &attenuator.transport.written[2];
        assert_eq!(packet[0], 42);
        assert_eq!(attenuator.transport.written_text(2), ":CHAN:2:SETATT:15.5");
    }

    #[test]
    fn test_shorter_command_leaves_no_stale_bytes() {
        let mut attenuator = connected(&["1", "15.5"]);
        let channel = attenuator.channel(1).unwrap();
        attenuator.set_attenuation(channel, 15.5).unwrap();
        attenuator.query_all().unwrap();

        let packet = &attenuator.transport.written[3];
        assert_eq!(&packet[1..6], b":ATT?");
        assert!(packet[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_queries_return_raw_reply() {
        let mut attenuator = connected(&["30.25", "10 20 30 40"]);
        let channel = attenuator.channel(4).unwrap();
        assert_eq!(attenuator.query_attenuation(channel).unwrap(), "30.25");
        assert_eq!(attenuator.query_all().unwrap(), "10 20 30 40");
        assert_eq!(attenuator.transport.written_text(2), ":CHAN:4:ATT?");
        assert_eq!(attenuator.transport.written_text(3), ":ATT?");
    }

    #[test]
    fn test_invalid_requests_never_reach_device() {
        let mut attenuator = connected(&[]);
        assert!(attenuator.channel(5).is_err());
        let channel = attenuator.channel(1).unwrap();
        assert!(matches!(
            attenuator.set_attenuation(channel, -3.0),
            Err(AttenuatorError::InvalidAttenuation(_))
        ));
        assert!(attenuator.send_scpi(&"X".repeat(70)).is_err());
        assert_eq!(attenuator.transport.written.len(), 2);
    }

    #[test]
    fn test_empty_read_is_an_error() {
        let mut transport = ScriptedTransport::default();
        transport.replies.push_back(Vec::new());
        assert!(matches!(
            Attenuator::connect(transport, 4),
            Err(AttenuatorError::EmptyResponse)
        ));
    }

    #[test]
    fn test_transport_error_propagates() {
        let mut attenuator = connected(&[]);
        assert!(matches!(
            attenuator.query_all(),
            Err(AttenuatorError::Usb(rusb::Error::Timeout))
        ));
    }

    #[test]
    fn test_short_write_is_an_error() {
        let mut transport = ScriptedTransport::with_replies(&["11811130"]);
        transport.write_limit = Some(32);
        match Attenuator::connect(transport, 4) {
            Err(AttenuatorError::ShortWrite { written, expected }) => {
                assert_eq!(written, 32);
                assert_eq!(expected, PACKET_SIZE);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("short write accepted"),
        }
    }

    fn identifying(serial: &str) -> Result<ScriptedTransport> {
        Ok(ScriptedTransport::with_replies(&[serial, "RC4DAT-6G-60"]))
    }

    #[test]
    fn test_select_skips_unresponsive_device() {
        let candidates = vec![
            Err(AttenuatorError::Usb(rusb::Error::Access)),
            Ok(ScriptedTransport::default()),
            identifying("22222222"),
        ];
        let attenuator = Attenuator::select(candidates, 4, None).unwrap();
        assert_eq!(attenuator.serial_number(), "22222222");
    }

    #[test]
    fn test_select_by_serial_keeps_searching() {
        let candidates = vec![
            Ok(ScriptedTransport::default()),
            identifying("11111111"),
            identifying("22222222"),
            identifying("33333333"),
        ];
        let attenuator = Attenuator::select(candidates, 4, Some("22222222")).unwrap();
        assert_eq!(attenuator.serial_number(), "22222222");
        assert_eq!(attenuator.model_name(), "RC4DAT-6G-60");
    }

    #[test]
    fn test_select_without_match() {
        let candidates = vec![Ok(ScriptedTransport::default()), identifying("11111111")];
        assert!(matches!(
            Attenuator::select(candidates, 4, Some("99999999")),
            Err(AttenuatorError::DeviceNotFound)
        ));
        let none: Vec<Result<ScriptedTransport>> = Vec::new();
        assert!(matches!(
            Attenuator::select(none, 4, None),
            Err(AttenuatorError::DeviceNotFound)
        ));
    }
}
