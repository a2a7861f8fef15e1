//! Narrow adapter over the `update` tool.
//!
//! This is the only place that knows the tool's command syntax and scrapes
//! its text output. The engine asks typed questions (`read_register`,
//! `identify`) and never looks at raw responses.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use super::DeviceSession;
use crate::error::{FlashError, FlashResult};
use crate::executor::{command_line, CommandExecutor, CommandOutput, UPDATE_TOOL};
use crate::logging::DeviceLog;

/// The tool eats the first bytes of a bulk/tpl command string.
const BULK_PADDING: &str = "     ";

fn bus_address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Bus \d{3} Device \d{3}: ID [0-9A-Fa-f]{4}:[0-9A-Fa-f]{4}")
            .expect("static regex")
    })
}

fn chip_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"ChipID is:(\w+)").expect("static regex"))
}

fn bulk_reply_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"bulkInReply success:(\w+)").expect("static regex"))
}

fn firmware_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d)-(\d)-(\d)-(\d)-(\d)-(\d)-(\d)").expect("static regex")
    })
}

fn device_arg(bus_address: &str) -> String {
    format!("path-{bus_address}")
}

/// Every bus address in a scan listing, in order of appearance.
pub fn parse_bus_addresses(scan_output: &str) -> Vec<String> {
    bus_address_pattern()
        .find_iter(scan_output)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Run `update scan` and list the attached boards.
///
/// A failing scan is treated as an empty bus; the next poll tries again.
pub fn scan_bus(executor: &dyn CommandExecutor) -> Vec<String> {
    match executor.execute(UPDATE_TOOL, &["scan".to_string()]) {
        Ok(out) => parse_bus_addresses(&out.stdout),
        Err(err) => {
            debug!("bus scan failed: {err}");
            Vec::new()
        }
    }
}

/// Resolve the chip id of the board at `bus_address`.
///
/// Boards in the protocol-ready stage answer `chipid` directly. Boards sitting
/// in the boot ROM report `romStage not bl1/bl2` and need the id pulled with a
/// bulk command instead. `None` when the board is not ready to answer yet.
pub fn probe_chip_id(executor: &dyn CommandExecutor, bus_address: &str) -> Option<String> {
    info!("[{bus_address}] Reading chipID...");
    let out = executor
        .execute(UPDATE_TOOL, &["chipid".to_string(), device_arg(bus_address)])
        .ok()?;

    let chip_id = if out.stdout.contains("ChipID is:") {
        chip_id_pattern()
            .captures(&out.stdout)
            .map(|caps| caps[1].to_string())
    } else if out.stdout.contains("romStage not bl1/bl2") {
        let reply = executor
            .execute(
                UPDATE_TOOL,
                &[
                    "bulkcmd".to_string(),
                    device_arg(bus_address),
                    format!("{BULK_PADDING}get_chipid"),
                ],
            )
            .ok()?;
        bulk_reply_pattern()
            .captures(&reply.stdout)
            .map(|caps| format!("0x{}", &caps[1]))
    } else {
        None
    };

    if let Some(chip_id) = &chip_id {
        info!("[{bus_address}] chipID: {chip_id}");
    }
    chip_id
}

/// Board firmware identification, as seven single digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion(pub [u8; 7]);

impl FirmwareVersion {
    /// USB protocol revision the ROM speaks.
    pub fn usb_protocol(&self) -> u8 {
        self.0[4]
    }
}

/// `update` bound to one board and its device log.
pub struct UpdateClient<'a> {
    executor: &'a dyn CommandExecutor,
    session: &'a DeviceSession,
    log: &'a DeviceLog,
}

impl<'a> UpdateClient<'a> {
    pub fn new(
        executor: &'a dyn CommandExecutor,
        session: &'a DeviceSession,
        log: &'a DeviceLog,
    ) -> Self {
        Self {
            executor,
            session,
            log,
        }
    }

    /// Run `update <command> path-<addr> <args...>` and return whatever came
    /// back. Only a failure to run the tool at all is an error.
    pub fn call(&self, command: &str, args: &[&str]) -> FlashResult<CommandOutput> {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(command.to_string());
        argv.push(device_arg(&self.session.bus_address()));

        let mut rest = args.iter();
        if matches!(command, "bulkcmd" | "tplcmd") {
            let Some(first) = rest.next() else {
                return Err(FlashError::command(command, "requires at least one argument"));
            };
            argv.push(format!("{BULK_PADDING}{first}"));
        }
        argv.extend(rest.map(|arg| arg.to_string()));

        let line = command_line(UPDATE_TOOL, &argv);
        self.log.info(&format!("Command: {line}"));
        let result = self.executor.execute(UPDATE_TOOL, &argv);

        self.log.info(&format!("{0} Response {0}", "-".repeat(10)));
        let out = match result {
            Ok(out) => out,
            Err(err) => {
                self.log.error(&format!("\n{err}"));
                self.log.info(&"-".repeat(30));
                return Err(FlashError::command(display_args(command, args), err.to_string()));
            }
        };
        if !out.stdout.is_empty() {
            self.log.info(&format!("\n{}", out.stdout));
        }
        if !out.stderr.is_empty() {
            self.log.error(&format!("\n{}", out.stderr));
        }
        self.log.info(&"-".repeat(30));
        Ok(out)
    }

    /// Best-effort command; the outcome is only reported.
    pub fn attempt(&self, command: &str, args: &[&str]) -> bool {
        self.call(command, args)
            .map(|out| out.succeeded())
            .unwrap_or(false)
    }

    /// Command that must succeed.
    pub fn run(&self, command: &str, args: &[&str]) -> FlashResult<CommandOutput> {
        let out = self.call(command, args)?;
        if !out.succeeded() {
            let detail = if out.stdout.trim().is_empty() {
                format!("exit code {}: {}", out.code, out.stderr.trim())
            } else {
                format!("exit code {}: {}", out.code, first_line(&out.stdout))
            };
            return Err(FlashError::command(display_args(command, args), detail));
        }
        Ok(out)
    }

    pub fn bulkcmd(&self, text: &str) -> bool {
        self.attempt("bulkcmd", &[text])
    }

    pub fn bulkcmd_checked(&self, text: &str) -> FlashResult<()> {
        self.run("bulkcmd", &[text]).map(drop)
    }

    /// Read one 32-bit register with `rreg 4 <addr>`.
    pub fn read_register(&self, address: u32) -> FlashResult<u32> {
        let addr_arg = format!("0x{address:08x}");
        let out = self.call("rreg", &["4", &addr_arg])?;
        if out.code != 0 {
            return Err(FlashError::command(
                format!("rreg 4 {addr_arg}"),
                format!("exit code {}", out.code),
            ));
        }
        parse_register_value(&out.stdout, address).ok_or_else(|| {
            FlashError::command(
                format!("rreg 4 {addr_arg}"),
                format!("no value for {address:08x} in response"),
            )
        })
    }

    /// `identify 7`.
    pub fn identify(&self) -> FlashResult<FirmwareVersion> {
        let out = self.call("identify", &["7"])?;
        parse_firmware_version(&out.stdout)
            .ok_or_else(|| FlashError::command("identify 7", "can't identify device"))
    }
}

/// Find `<addr>: <hex>` in an `rreg` dump, case-insensitively.
pub fn parse_register_value(dump: &str, address: u32) -> Option<u32> {
    let lowered = dump.to_ascii_lowercase();
    let pattern = Regex::new(&format!(r"{address:x}:\s*(\w+)")).ok()?;
    let caps = pattern.captures(&lowered)?;
    parse_hex(&caps[1])
}

pub fn parse_firmware_version(out: &str) -> Option<FirmwareVersion> {
    if !out.contains("firmware") {
        return None;
    }
    let caps = firmware_version_pattern().captures(out)?;
    let mut digits = [0u8; 7];
    for (idx, slot) in digits.iter_mut().enumerate() {
        *slot = caps[idx + 1].parse().ok()?;
    }
    Some(FirmwareVersion(digits))
}

/// Parse `0x`-prefixed or bare hex.
pub fn parse_hex(raw: &str) -> Option<u32> {
    let digits = raw
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u32::from_str_radix(digits, 16).ok()
}

fn display_args(command: &str, args: &[&str]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::mock::ScriptedExecutor;
    use crate::logging::tests::SharedBuffer;

    const ADDR: &str = "Bus 001 Device 004: ID 1b8e:c003";

    #[test]
    fn parses_every_bus_address_in_scan_output() {
        let scan = "Bus 001 Device 004: ID 1b8e:c003\n\
                    garbage\n\
                    Bus 002 Device 117: ID 1B8E:C003 extra";
        assert_eq!(
            parse_bus_addresses(scan),
            vec![
                "Bus 001 Device 004: ID 1b8e:c003".to_string(),
                "Bus 002 Device 117: ID 1B8E:C003".to_string(),
            ]
        );
        assert!(parse_bus_addresses("No device found").is_empty());
    }

    #[test]
    fn chip_id_from_protocol_ready_board() {
        let exec = ScriptedExecutor::new();
        exec.respond("chipid", CommandOutput::ok("ChipID is:0x2a1b00c3d4"));
        assert_eq!(probe_chip_id(&exec, ADDR).as_deref(), Some("0x2a1b00c3d4"));
        assert!(exec.calls_containing("get_chipid").is_empty());
    }

    #[test]
    fn chip_id_from_boot_rom_board_is_prefixed() {
        let exec = ScriptedExecutor::new();
        exec.respond("update chipid", CommandOutput::ok("ERR: romStage not bl1/bl2"));
        exec.respond("get_chipid", CommandOutput::ok("bulkInReply success:deadbeef01"));

        assert_eq!(probe_chip_id(&exec, ADDR).as_deref(), Some("0xdeadbeef01"));
        assert_eq!(
            exec.calls_containing("get_chipid"),
            vec![format!("update bulkcmd path-{ADDR} get_chipid")]
        );
    }

    #[test]
    fn chip_id_absent_when_board_not_ready() {
        let exec = ScriptedExecutor::new();
        exec.respond("chipid", CommandOutput::failed(1, "libusb busy"));
        assert_eq!(probe_chip_id(&exec, ADDR), None);

        let exec = ScriptedExecutor::new();
        exec.fail_spawn("chipid");
        assert_eq!(probe_chip_id(&exec, ADDR), None);
    }

    #[test]
    fn bulkcmd_pads_first_argument_and_logs_exchange() {
        let exec = ScriptedExecutor::new();
        let session = DeviceSession::new("0x1", ADDR);
        let buffer = SharedBuffer::default();
        let log = DeviceLog::to_writer(buffer.clone());
        let client = UpdateClient::new(&exec, &session, &log);

        exec.respond("echo", CommandOutput::ok("bulkInReply success"));
        assert!(client.bulkcmd("echo 12345"));

        let text = buffer.contents();
        assert!(text.contains(&format!("Command: update bulkcmd path-{ADDR} echo 12345")));
        assert!(text.contains("---------- Response ----------"));
        assert!(text.contains("bulkInReply success"));
    }

    #[test]
    fn bulkcmd_without_argument_is_rejected() {
        let exec = ScriptedExecutor::new();
        let session = DeviceSession::new("0x1", ADDR);
        let log = DeviceLog::sink();
        let client = UpdateClient::new(&exec, &session, &log);

        assert!(client.call("bulkcmd", &[]).is_err());
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn run_fails_on_err_prefix() {
        let exec = ScriptedExecutor::new();
        let session = DeviceSession::new("0x1", ADDR);
        let log = DeviceLog::sink();
        let client = UpdateClient::new(&exec, &session, &log);

        exec.respond("erase_bootloader", CommandOutput::ok("ERR: timeout"));
        let err = client.bulkcmd_checked("erase_bootloader").unwrap_err();
        assert!(matches!(err, FlashError::CommandFailure { .. }));
        assert!(err.to_string().contains("erase_bootloader"));
        assert!(!client.bulkcmd("erase_bootloader"));
    }

    #[test]
    fn commands_follow_the_current_bus_address() {
        let exec = ScriptedExecutor::new();
        let session = DeviceSession::new("0x1", ADDR);
        let log = DeviceLog::sink();
        let client = UpdateClient::new(&exec, &session, &log);

        session.mark_reconnected("Bus 001 Device 009: ID 1b8e:c003");
        client.attempt("identify", &["7"]);
        assert_eq!(
            exec.calls(),
            vec!["update identify path-Bus 001 Device 009: ID 1b8e:c003 7".to_string()]
        );
    }

    #[test]
    fn register_value_parsed_case_insensitively() {
        assert_eq!(
            parse_register_value("C8100228: 000000D0", 0xc810_0228),
            Some(0xd0)
        );
        assert_eq!(
            parse_register_value("reg ff800228:10", 0xff80_0228),
            Some(0x10)
        );
        assert_eq!(parse_register_value("nothing here", 0xff80_0228), None);
    }

    #[test]
    fn read_register_requires_zero_exit() {
        let exec = ScriptedExecutor::new();
        let session = DeviceSession::new("0x1", ADDR);
        let log = DeviceLog::sink();
        let client = UpdateClient::new(&exec, &session, &log);

        exec.respond(
            "rreg",
            CommandOutput {
                code: 2,
                stdout: "c8100228: 00000010".into(),
                stderr: String::new(),
            },
        );
        assert!(client.read_register(0xc810_0228).is_err());
        assert_eq!(exec.calls_containing("rreg path-").len(), 1);
    }

    #[test]
    fn firmware_version_needs_marker_and_seven_digits() {
        let version = parse_firmware_version("This firmware version is 0-7-0-16-0-0-0").unwrap_or(
            FirmwareVersion([9; 7]),
        );
        assert_eq!(version.0, [9; 7]);

        let version = parse_firmware_version("firmware version 0-7-0-8-8-0-0").unwrap();
        assert_eq!(version.usb_protocol(), 8);

        assert!(parse_firmware_version("0-7-0-8-8-0-0").is_none());
        assert!(parse_firmware_version("firmware 0-7-0").is_none());
    }

    #[test]
    fn hex_accepts_prefixed_and_bare() {
        assert_eq!(parse_hex("0xd9000000"), Some(0xd900_0000));
        assert_eq!(parse_hex("D9000000"), Some(0xd900_0000));
        assert_eq!(parse_hex("zz"), None);
    }
}
