mod platform;
mod scenario;

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use embassy_time::Duration;
use macservices::platform::{Clock, CommandResponse, FwEvent};
use macservices::{
    CommandStatus, MacFailure, MacNotification, MacOutput, MacServices, Notifications,
};

use platform::ScriptedPlatform;
use scenario::Step;

#[derive(Debug, Parser)]
#[command(name = "mac_replay")]
#[command(about = "Replays a TOML scenario through the MAC services facade")]
struct Cli {
    scenario: PathBuf,
    /// File with the expected notification lines, one per line.
    #[arg(long)]
    expect: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let scenario = scenario::load(&cli.scenario)?;

    let mut mac = MacServices::new(ScriptedPlatform::new(), scenario.config.apply());
    mac.register_failure_handler(print_failure);

    let mut lines = Vec::new();
    for (idx, step) in scenario.steps.iter().enumerate() {
        let notifications =
            apply(&mut mac, step).with_context(|| format!("step {} ({step:?})", idx + 1))?;
        for notification in &notifications {
            let line = notification_line(notification);
            println!("notify,{line}");
            lines.push(line);
        }
    }

    if let Some(expect_path) = cli.expect {
        let expected = parse_expected(&expect_path)?;
        if lines != expected {
            eprintln!("expected:\n  {}", expected.join("\n  "));
            eprintln!("actual:\n  {}", lines.join("\n  "));
            return Err(anyhow!("notification sequence mismatch"));
        }
    }

    Ok(())
}

fn print_failure(failure: MacFailure) {
    println!("failure,{failure:?}");
}

fn apply(mac: &mut MacServices<ScriptedPlatform>, step: &Step) -> Result<Vec<MacNotification>> {
    let mut out = Vec::new();
    match step {
        Step::SetPsMode {
            mode,
            send_null_data,
        } => {
            let output = mac.set_ps_mode((*mode).into(), *send_null_data);
            out.extend(report(output, "set_ps_mode"));
        }
        Step::StartScan(fields) => {
            let output = mac.start_scan(fields.request()?);
            out.extend(report(output, "start_scan"));
        }
        Step::StopScan {
            tag,
            send_null_data,
        } => {
            let output = mac.stop_scan((*tag).into(), *send_null_data);
            out.extend(output.notifications);
        }
        Step::StartMeasurement(fields) => {
            let now = mac.platform().now();
            let (request, max_delay) = fields.request(now)?;
            let output = mac.start_measurement(request, max_delay);
            out.extend(report(output, "start_measurement"));
        }
        Step::StopMeasurement { send_null_data } => {
            out.extend(mac.stop_measurement(*send_null_data).notifications);
        }
        Step::PowerReport { transition } => {
            let event = FwEvent::PowerSaveReport((*transition).into());
            out.extend(mac.handle_event(event).notifications);
        }
        Step::ScanComplete(fields) => {
            let event = if fields.sps {
                FwEvent::SpsScanComplete(fields.event())
            } else {
                FwEvent::ScanComplete(fields.event())
            };
            out.extend(mac.handle_event(event).notifications);
        }
        Step::MeasurementStarted => {
            out.extend(mac.handle_event(FwEvent::MeasurementStarted).notifications);
        }
        Step::MeasurementComplete => {
            out.extend(mac.handle_event(FwEvent::MeasurementComplete).notifications);
        }
        Step::Response(fields) => {
            let response = CommandResponse {
                kind: fields.command.into(),
                status: if fields.ok {
                    CommandStatus::Ok
                } else {
                    CommandStatus::Failed
                },
                payload: fields.payload(),
            };
            out.extend(mac.command_response(response).notifications);
        }
        Step::Expire {
            timer,
            index,
            was_reset,
        } => {
            let timer = timer.timer(*index);
            if !mac.platform_mut().fire(timer) {
                println!("timer,expire,{timer:?},not armed");
            }
            out.extend(mac.timer_expired(timer, *was_reset).notifications);
        }
        Step::Advance { ms } => {
            mac.platform_mut().advance(Duration::from_millis(*ms));
            for timer in mac.platform_mut().take_expired() {
                println!("timer,expire,{timer:?}");
                out.extend(mac.timer_expired(timer, false).notifications);
            }
        }
        Step::Reject { command } => mac.platform_mut().reject((*command).into()),
        Step::AcceptAll => mac.platform_mut().accept_all(),
        Step::Reset => out.extend(mac.notify_reset().notifications),
    }
    Ok(out)
}

fn report<T: std::fmt::Debug, E: std::fmt::Display>(
    output: MacOutput<Result<T, E>>,
    operation: &str,
) -> Notifications {
    match output.result {
        Ok(reply) => println!("result,{operation},{reply:?}"),
        Err(err) => println!("result,{operation},error,{err}"),
    }
    output.notifications
}

fn notification_line(notification: &MacNotification) -> String {
    match notification {
        MacNotification::PowerSaveComplete(transition) => {
            format!("power_save_complete,{transition:?}")
        }
        MacNotification::PowerCommandAccepted(status) => format!("power_command,{status:?}"),
        MacNotification::ScanCommandAccepted { tag, status } => {
            format!("scan_command,{tag:?},{status:?}")
        }
        MacNotification::ScanComplete(report) => format!(
            "scan_complete,{:?},{:?},results={},power_save={}",
            report.tag, report.status, report.result_count, report.power_save
        ),
        MacNotification::MeasurementCommandAccepted(status) => {
            format!("measurement_command,{status:?}")
        }
        MacNotification::MeasurementComplete(reply) => {
            let types: Vec<String> = reply
                .types
                .iter()
                .map(|entry| format!("{:?}:{:?}:{:?}", entry.kind, entry.status, entry.value))
                .collect();
            format!("measurement_complete,{},{}", reply.channel, types.join(";"))
        }
    }
}

fn parse_expected(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
