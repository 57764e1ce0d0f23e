//! Interactive text menu over an open attenuator session.

use std::io::{BufRead, Write};

use crate::attenuator::Attenuator;
use crate::error::{AttenuatorError, Result};
use crate::scpi::{Channel, SetAttStatus};
use crate::usb::Transport;

pub struct Menu<'a, T: Transport, R: BufRead, W: Write> {
    attenuator: &'a mut Attenuator<T>,
    input: R,
    output: W,
}

impl<'a, T: Transport, R: BufRead, W: Write> Menu<'a, T, R, W> {
    pub fn new(attenuator: &'a mut Attenuator<T>, input: R, output: W) -> Self {
        Menu {
            attenuator,
            input,
            output,
        }
    }

    /// Runs until the user picks "Exit" or input ends.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.print_options()?;
            let Some(choice) = self.prompt("Enter your choice: ")? else {
                writeln!(self.output)?;
                writeln!(self.output, "Exiting program.")?;
                return Ok(());
            };

            let outcome = match choice.as_str() {
                "1" => self.set_one(),
                "2" => self.set_sequential(),
                "3" => self.query_one(),
                "4" => self.query_all(),
                "5" => {
                    writeln!(self.output, "Exiting program.")?;
                    return Ok(());
                }
                _ => {
                    writeln!(self.output, "Invalid choice. Please try again.")?;
                    Ok(())
                }
            };

            match outcome {
                Ok(()) => {}
                Err(AttenuatorError::Io(e)) => return Err(AttenuatorError::Io(e)),
                Err(e) => {
                    log::error!("Menu action failed: {}", e);
                    writeln!(self.output, "Error: {}", e)?;
                }
            }
        }
    }

    fn print_options(&mut self) -> Result<()> {
        writeln!(self.output)?;
        writeln!(self.output, "--- Mini-Circuits Attenuator Control ---")?;
        writeln!(self.output, "1. Set attenuation for a specific channel")?;
        writeln!(self.output, "2. Set attenuation for all channels sequentially")?;
        writeln!(self.output, "3. Query attenuation for a specific channel")?;
        writeln!(self.output, "4. Query attenuation for all channels")?;
        writeln!(self.output, "5. Exit")?;
        Ok(())
    }

    /// Returns `None` once input is exhausted.
    fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        write!(self.output, "{}", text)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn channel_prompt(&mut self) -> Result<Option<String>> {
        let max = self.attenuator.channel_count();
        self.prompt(&format!("Enter channel number (1-{}): ", max))
    }

    fn resolve_channel(&mut self, number: i64) -> Result<Option<Channel>> {
        let channel = u8::try_from(number)
            .ok()
            .and_then(|n| self.attenuator.channel(n).ok());
        if channel.is_none() {
            writeln!(
                self.output,
                "Invalid channel. Please select a channel between 1 and {}.",
                self.attenuator.channel_count()
            )?;
        }
        Ok(channel)
    }

    fn set_one(&mut self) -> Result<()> {
        let Some(channel_text) = self.channel_prompt()? else {
            return Ok(());
        };
        let Ok(number) = channel_text.parse::<i64>() else {
            writeln!(self.output, "Invalid input. Please enter valid numbers.")?;
            return Ok(());
        };
        let Some(value_text) = self.prompt("Enter attenuation value (in dB): ")? else {
            return Ok(());
        };
        let Ok(db) = value_text.parse::<f64>() else {
            writeln!(self.output, "Invalid input. Please enter valid numbers.")?;
            return Ok(());
        };
        if let Some(channel) = self.resolve_channel(number)? {
            self.apply(channel, db)?;
        }
        Ok(())
    }

    fn set_sequential(&mut self) -> Result<()> {
        for channel in Channel::all(self.attenuator.channel_count()) {
            let prompt = format!("Enter attenuation value for Channel {} (in dB): ", channel);
            let Some(value_text) = self.prompt(&prompt)? else {
                return Ok(());
            };
            let Ok(db) = value_text.parse::<f64>() else {
                writeln!(self.output, "Invalid input. Please enter a valid number.")?;
                continue;
            };
            match self.apply(channel, db) {
                Ok(()) => {}
                Err(AttenuatorError::Io(e)) => return Err(AttenuatorError::Io(e)),
                Err(e) => {
                    log::error!("Setting channel {} failed: {}", channel, e);
                    writeln!(self.output, "Error: {}", e)?;
                }
            }
        }
        writeln!(self.output, "All channels have been configured sequentially.")?;
        Ok(())
    }

    fn apply(&mut self, channel: Channel, db: f64) -> Result<()> {
        let status = self.attenuator.set_attenuation(channel, db)?;
        writeln!(
            self.output,
            "Channel {} attenuation set to {} dB. Response: {}",
            channel,
            db,
            status.raw()
        )?;
        if status != SetAttStatus::Success {
            writeln!(self.output, "Warning: {}", status)?;
        }
        Ok(())
    }

    fn query_one(&mut self) -> Result<()> {
        let Some(channel_text) = self.channel_prompt()? else {
            return Ok(());
        };
        let Ok(number) = channel_text.parse::<i64>() else {
            writeln!(self.output, "Invalid input. Please enter a valid number.")?;
            return Ok(());
        };
        if let Some(channel) = self.resolve_channel(number)? {
            let reply = self.attenuator.query_attenuation(channel)?;
            writeln!(self.output, "Channel {} attenuation: {} dB.", channel, reply)?;
        }
        Ok(())
    }

    fn query_all(&mut self) -> Result<()> {
        let reply = self.attenuator.query_all()?;
        writeln!(self.output, "All channel attenuations: {}", reply)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attenuator::tests::{connected, ScriptedTransport};
    use std::io::Cursor;

    fn run_menu(attenuator: &mut Attenuator<ScriptedTransport>, script: &str) -> String {
        let mut output = Vec::new();
        Menu::new(attenuator, Cursor::new(script.as_bytes()), &mut output)
            .run()
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_exit_option() {
        let mut attenuator = connected(&[]);
        let output = run_menu(&mut attenuator, "5\n");
        assert!(output.contains("--- Mini-Circuits Attenuator Control ---"));
        assert!(output.ends_with("Exiting program.\n"));
    }

    #[test]
    fn test_end_of_input_exits() {
        let mut attenuator = connected(&[]);
        let output = run_menu(&mut attenuator, "");
        assert!(output.contains("Exiting program."));
    }

    #[test]
    fn test_set_single_channel() {
        let mut attenuator = connected(&["1"]);
        let output = run_menu(&mut attenuator, "1\n3\n12.5\n5\n");
        assert!(output.contains("Channel 3 attenuation set to 12.5 dB. Response: 1"));
        assert!(!output.contains("Warning"));
    }

    #[test]
    fn test_set_out_of_range_warns() {
        let mut attenuator = connected(&["2"]);
        let output = run_menu(&mut attenuator, "1\n1\n200\n5\n");
        assert!(output.contains("Response: 2"));
        assert!(output.contains("Warning: out of range, set to maximum"));
    }

    #[test]
    fn test_set_rejects_bad_input() {
        let mut attenuator = connected(&[]);
        let output = run_menu(&mut attenuator, "1\nabc\n1\n9\n10\n1\n0\n10\n5\n");
        assert!(output.contains("Invalid input. Please enter valid numbers."));
        assert_eq!(
            output
                .matches("Invalid channel. Please select a channel between 1 and 4.")
                .count(),
            2
        );
    }

    #[test]
    fn test_bad_channel_skips_value_prompt() {
        let mut attenuator = connected(&["10 20 30 40"]);
        let output = run_menu(&mut attenuator, "1\nabc\n4\n5\n");
        assert!(output.contains("Invalid input. Please enter valid numbers."));
        assert!(!output.contains("Enter attenuation value (in dB): "));
        assert!(output.contains("All channel attenuations: 10 20 30 40"));
    }

    #[test]
    fn test_sequential_continues_after_rejected_value() {
        let mut attenuator = connected(&["1", "1", "1"]);
        let output = run_menu(&mut attenuator, "2\n-5\n20\n30\n40\n5\n");
        assert!(output.contains("Error: Invalid attenuation value: -5"));
        assert!(output.contains("Channel 2 attenuation set to 20 dB."));
        assert!(output.contains("Channel 3 attenuation set to 30 dB."));
        assert!(output.contains("Channel 4 attenuation set to 40 dB."));
        assert!(output.contains("All channels have been configured sequentially."));
        assert!(!output.contains("Invalid choice"));
        assert!(output.ends_with("Exiting program.\n"));
    }

    #[test]
    fn test_sequential_skips_bad_value() {
        let mut attenuator = connected(&["1", "1", "1"]);
        let output = run_menu(&mut attenuator, "2\n10\nx\n30\n40\n5\n");
        assert!(output.contains("Channel 1 attenuation set to 10 dB."));
        assert!(output.contains("Invalid input. Please enter a valid number."));
        assert!(!output.contains("Channel 2 attenuation set"));
        assert!(output.contains("Channel 4 attenuation set to 40 dB."));
        assert!(output.contains("All channels have been configured sequentially."));
    }

    #[test]
    fn test_queries() {
        let mut attenuator = connected(&["15.25", "10 20 30 40"]);
        let output = run_menu(&mut attenuator, "3\n2\n4\n5\n");
        assert!(output.contains("Channel 2 attenuation: 15.25 dB."));
        assert!(output.contains("All channel attenuations: 10 20 30 40"));
    }

    #[test]
    fn test_invalid_choice_and_device_error_keep_looping() {
        // No reply queued for the query, so the transport times out.
        let mut attenuator = connected(&[]);
        let output = run_menu(&mut attenuator, "9\n4\n5\n");
        assert!(output.contains("Invalid choice. Please try again."));
        assert!(output.contains("Error: USB error: Operation timed out"));
        assert!(output.ends_with("Exiting program.\n"));
    }

    #[test]
    fn test_negative_value_reports_error() {
        let mut attenuator = connected(&[]);
        let output = run_menu(&mut attenuator, "1\n1\n-5\n5\n");
        assert!(output.contains("Error: Invalid attenuation value: -5"));
    }
}
