//! Host smoke test: drives the public facade through a full power/scan/measurement day.

use embassy_time::{Duration, Instant};
use macservices::measurement::{
    ChannelLoadCounters, MeasurementKind, MeasurementRequest, MeasurementStatus,
    MeasurementTypeRequest, MeasurementValue,
};
use macservices::platform::{
    Clock, CommandChannel, CommandError, CommandKind, CommandResponse, EventChannel, FwCommand,
    FwEvent, FwEventId, GuardTimer, GuardTimers, ReadPayload, ScanCompleteEvent,
};
use macservices::scan::{ScanChannel, ScanParams, ScanRequest, ScanState, ScanStatus, ScanTag};
use macservices::{
    Band, CommandStatus, MacNotification, MacServices, MacServicesConfig, PowerMode, PsTransition,
};

#[derive(Default)]
struct Bench {
    sent: Vec<CommandKind>,
    timers: Vec<GuardTimer>,
    unmasked: usize,
}

impl CommandChannel for Bench {
    fn send_command(&mut self, command: &FwCommand) -> Result<(), CommandError> {
        self.sent.push(command.kind());
        Ok(())
    }
}

impl EventChannel for Bench {
    fn unmask_event(&mut self, _event: FwEventId) {
        self.unmasked += 1;
    }
}

impl GuardTimers for Bench {
    fn start_timer(&mut self, timer: GuardTimer, _interval: Duration) {
        self.timers.retain(|running| *running != timer);
        self.timers.push(timer);
    }

    fn stop_timer(&mut self, timer: GuardTimer) {
        self.timers.retain(|running| *running != timer);
    }
}

impl Clock for Bench {
    fn now(&self) -> Instant {
        Instant::from_millis(10_000)
    }
}

/// Fires `timer` the way the async runtime does: disarmed first, then delivered.
fn fire(mac: &mut MacServices<Bench>, timer: GuardTimer) {
    mac.platform_mut().timers.retain(|running| *running != timer);
    mac.timer_expired(timer, false);
}

fn scan_request() -> ScanRequest {
    ScanRequest {
        params: ScanParams {
            channels: [ScanChannel {
                channel: 11,
                min_dwell_us: 20_000,
                max_dwell_us: 40_000,
                start_offset_tu: 0,
            }]
            .into_iter()
            .collect(),
            ..ScanParams::default()
        },
        tag: ScanTag::CurrentBss,
        driver_mode: true,
        power_mode: PowerMode::PowerSave,
        ..ScanRequest::default()
    }
}

#[test]
fn power_scan_and_measurement_share_the_radio() {
    let mut mac = MacServices::new(Bench::default(), MacServicesConfig::default());
    assert_eq!(mac.platform().unmasked, FwEventId::ALL.len());

    // User policy: power save.
    mac.set_ps_mode(PowerMode::PowerSave, false);
    let output = mac.handle_event(FwEvent::PowerSaveReport(PsTransition::EnterSuccess));
    assert_eq!(
        output.notifications.as_slice(),
        &[MacNotification::PowerSaveComplete(PsTransition::EnterSuccess)]
    );

    // Scan reserves power save, which is already current.
    assert_eq!(mac.start_scan(scan_request()).result, Ok(()));
    assert_eq!(mac.scan_state(), ScanState::Scanning);
    mac.command_response(CommandResponse::ok(CommandKind::Scan));
    mac.handle_event(FwEvent::ScanComplete(ScanCompleteEvent {
        result_count: 2,
        scanned_channels: 1,
        tsf_error: false,
    }));
    assert_eq!(mac.scan_state(), ScanState::Idle);

    // Serving-channel measurement keeps the current mode.
    let mut types = heapless::Vec::new();
    types
        .push(MeasurementTypeRequest::new(
            MeasurementKind::ChannelLoad,
            Duration::from_millis(100),
        ))
        .unwrap();
    let request = MeasurementRequest {
        channel: 3,
        band: Band::Ghz2_4,
        serving_channel: 3,
        received_at: Instant::from_millis(9_990),
        types,
    };
    assert_eq!(
        mac.start_measurement(request, Duration::from_millis(50)).result,
        Ok(())
    );
    mac.handle_event(FwEvent::MeasurementStarted);
    fire(&mut mac, GuardTimer::MeasurementType(0));
    mac.command_response(CommandResponse {
        kind: CommandKind::ReadChannelLoad,
        status: CommandStatus::Ok,
        payload: Some(ReadPayload::ChannelLoad(ChannelLoadCounters {
            cca_busy_us: 100_000,
            period_us: 100_000,
        })),
    });
    let output = mac.handle_event(FwEvent::MeasurementComplete);

    let reply = output
        .notifications
        .iter()
        .find_map(|notification| match notification {
            MacNotification::MeasurementComplete(reply) => Some(reply.clone()),
            _ => None,
        })
        .expect("measurement reply");
    assert_eq!(reply.types[0].status, MeasurementStatus::Success);
    assert_eq!(reply.types[0].value, MeasurementValue::ChannelLoad(255));
    assert!(mac.ps_status());
    assert!(mac.platform().timers.is_empty());
    let mode_commands = mac
        .platform()
        .sent
        .iter()
        .filter(|kind| **kind == CommandKind::SetPowerMode)
        .count();
    assert_eq!(mode_commands, 1);
}

#[test]
fn scan_report_reaches_the_caller() {
    let mut mac = MacServices::new(Bench::default(), MacServicesConfig::default());
    let mut request = scan_request();
    request.driver_mode = false;

    mac.start_scan(request);
    let output = mac.handle_event(FwEvent::ScanComplete(ScanCompleteEvent {
        result_count: 9,
        scanned_channels: 1,
        tsf_error: true,
    }));

    match output.notifications.as_slice() {
        [MacNotification::ScanComplete(report)] => {
            assert_eq!(report.tag, ScanTag::CurrentBss);
            assert_eq!(report.result_count, 9);
            assert!(report.tsf_error);
            assert_eq!(report.status, ScanStatus::Success);
        }
        other => panic!("unexpected notifications {other:?}"),
    }
}
