use embassy_time::{Duration, Instant};
use statig::blocking::IntoStateMachineExt as _;

use super::machine::{DispatchContext, MeasurementAction, MeasurementEvent, MeasurementSm};
use super::*;
use crate::config::MacServicesConfig;
use crate::platform::{CommandKind, CommandResponse, FwCommand, GuardTimer, ReadPayload};
use crate::power::PowerServer;
use crate::services::{Env, MacNotification, Outbox};
use crate::testing::{FakePlatform, TimerOp};
use crate::types::{
    Band, CommandStatus, DriverClient, MacFailure, PowerClient, PsTransition,
};

const SERVING_CHANNEL: u8 = 1;

struct Harness {
    server: MeasurementServer,
    power: PowerServer,
    platform: FakePlatform,
    outbox: Outbox,
}

impl Harness {
    fn new() -> Self {
        Self {
            server: MeasurementServer::new(MacServicesConfig::default()),
            power: PowerServer::new(MacServicesConfig::default()),
            platform: FakePlatform::new(),
            outbox: Outbox::default(),
        }
    }

    fn drive<R>(
        &mut self,
        f: impl FnOnce(&mut MeasurementServer, &mut Env<'_, FakePlatform>) -> R,
    ) -> R {
        let mut env = Env {
            power: &mut self.power,
            platform: &mut self.platform,
            outbox: &mut self.outbox,
        };
        let result = f(&mut self.server, &mut env);
        self.route();
        result
    }

    fn route(&mut self) {
        while let Some(notice) = self.outbox.next_power_notice() {
            if notice.client != PowerClient::Measurement {
                continue;
            }
            let mut env = Env {
                power: &mut self.power,
                platform: &mut self.platform,
                outbox: &mut self.outbox,
            };
            self.server.driver_mode_complete(notice.transition, &mut env);
        }
    }

    fn start(&mut self, request: MeasurementRequest) -> Result<(), MeasurementError> {
        self.drive(|server, env| {
            server.start_measurement(request, Duration::from_millis(100), env)
        })
    }

    fn started(&mut self) {
        self.drive(|server, env| server.start_complete(env));
    }

    fn stopped(&mut self) {
        self.drive(|server, env| server.stop_complete(env));
    }

    fn stop(&mut self) {
        self.drive(|server, env| server.stop_measurement(false, env));
    }

    fn type_expired(&mut self, index: u8) {
        self.drive(|server, env| server.type_expired(index, false, env));
    }

    fn respond(&mut self, response: CommandResponse) {
        self.drive(|server, env| server.command_response(response, env));
    }

    fn power_report(&mut self, transition: PsTransition) {
        self.power
            .handle_report(transition, &mut self.platform, &mut self.outbox);
        self.route();
    }

    fn replies(&mut self) -> Vec<MeasurementReply> {
        self.outbox
            .take_notifications()
            .into_iter()
            .filter_map(|notification| match notification {
                MacNotification::MeasurementComplete(reply) => Some(reply),
                _ => None,
            })
            .collect()
    }
}

fn request(channel: u8, types: &[(MeasurementKind, u64)]) -> MeasurementRequest {
    MeasurementRequest {
        channel,
        band: Band::Ghz2_4,
        serving_channel: SERVING_CHANNEL,
        received_at: Instant::from_millis(1_000),
        types: types
            .iter()
            .map(|&(kind, ms)| MeasurementTypeRequest::new(kind, Duration::from_millis(ms)))
            .collect(),
    }
}

fn read_channel_load(cca_busy_us: u32, period_us: u32) -> CommandResponse {
    CommandResponse {
        kind: CommandKind::ReadChannelLoad,
        status: CommandStatus::Ok,
        payload: Some(ReadPayload::ChannelLoad(ChannelLoadCounters {
            cca_busy_us,
            period_us,
        })),
    }
}

fn statuses(reply: &MeasurementReply) -> Vec<MeasurementStatus> {
    reply.types.iter().map(|entry| entry.status).collect()
}

#[test]
fn off_channel_measurement_runs_the_full_cycle() {
    let mut h = Harness::new();
    let request = request(
        6,
        &[(MeasurementKind::ChannelLoad, 50), (MeasurementKind::Beacon, 30)],
    );

    h.start(request).unwrap();
    assert_eq!(h.server.state(), MeasurementState::WaitDriverMode);
    assert_eq!(h.platform.kinds(), vec![CommandKind::SetPowerMode]);

    h.power_report(PsTransition::EnterSuccess);
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
    assert_eq!(
        h.platform.last_command(),
        Some(&FwCommand::MeasurementStart {
            channel: 6,
            band: Band::Ghz2_4,
            duration: Duration::from_millis(50),
        })
    );
    assert_eq!(
        h.platform.interval(GuardTimer::MeasurementStartStop),
        Some(Duration::from_millis(100))
    );

    h.started();
    assert_eq!(h.server.state(), MeasurementState::MeasureInProgress);
    assert!(!h.platform.is_running(GuardTimer::MeasurementStartStop));
    assert_eq!(
        h.platform.interval(GuardTimer::MeasurementType(0)),
        Some(Duration::from_millis(50))
    );
    assert_eq!(
        h.platform.interval(GuardTimer::MeasurementType(1)),
        Some(Duration::from_millis(30))
    );
    assert!(!h.server.is_measurement_complete());

    h.platform.clear_commands();
    h.type_expired(1);
    h.type_expired(0);
    assert_eq!(
        h.platform.kinds(),
        vec![
            CommandKind::ApDiscoveryStop,
            CommandKind::ChannelLoadStop,
            CommandKind::ReadChannelLoad,
        ]
    );
    assert!(!h.server.is_measurement_complete());

    h.respond(read_channel_load(25_000, 50_000));
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStop);
    assert!(h.server.is_measurement_complete());
    assert_eq!(h.platform.last_command(), Some(&FwCommand::MeasurementStop));

    h.stopped();
    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert!(!h.platform.is_running(GuardTimer::MeasurementStartStop));
    let replies = h.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].channel, 6);
    assert_eq!(
        replies[0].types.as_slice(),
        &[
            TypeReply {
                kind: MeasurementKind::ChannelLoad,
                status: MeasurementStatus::Success,
                value: MeasurementValue::ChannelLoad(127),
            },
            TypeReply {
                kind: MeasurementKind::Beacon,
                status: MeasurementStatus::Success,
                value: MeasurementValue::Beacon,
            },
        ]
    );

    // The release was not waited for; its notice is absorbed.
    h.power_report(PsTransition::ExitSuccess);
    assert_eq!(h.power.owner(), None);
    assert!(h.replies().is_empty());
    assert_eq!(h.server.last_error(), None);
}

#[test]
fn serving_channel_measurement_keeps_the_power_mode() {
    let mut h = Harness::new();

    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::ChannelLoad, 20)]))
        .unwrap();

    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
    assert_eq!(h.platform.kinds(), vec![CommandKind::MeasurementStart]);
}

#[test]
fn expired_deadline_rejects_every_type_without_firmware() {
    let mut h = Harness::new();
    let mut request = request(
        SERVING_CHANNEL,
        &[(MeasurementKind::ChannelLoad, 20), (MeasurementKind::Beacon, 20)],
    );
    request.received_at = Instant::from_millis(700);

    h.start(request).unwrap();

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert!(h.platform.commands.is_empty());
    assert!(h.platform.timer_ops.is_empty());
    let replies = h.replies();
    assert_eq!(
        statuses(&replies[0]),
        vec![MeasurementStatus::RejectedMaxDelayPassed; 2]
    );
    assert_eq!(h.power.owner(), None);
}

#[test]
fn driver_mode_failure_fails_every_type_without_release() {
    let mut h = Harness::new();

    h.start(request(6, &[(MeasurementKind::NoiseHistogram, 20)]))
        .unwrap();
    h.power_report(PsTransition::EnterFail);

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert_eq!(h.platform.kinds(), vec![CommandKind::SetPowerMode]);
    assert_eq!(statuses(&h.replies()[0]), vec![MeasurementStatus::Failed]);
}

#[test]
fn stop_during_start_waits_for_the_start_outcome() {
    let mut h = Harness::new();
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::ChannelLoad, 20)]))
        .unwrap();

    h.stop();
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
    assert_eq!(h.platform.kinds(), vec![CommandKind::MeasurementStart]);

    h.started();
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStop);
    assert_eq!(
        h.platform.kinds(),
        vec![CommandKind::MeasurementStart, CommandKind::MeasurementStop]
    );

    h.stopped();
    assert_eq!(statuses(&h.replies()[0]), vec![MeasurementStatus::Failed]);
}

#[test]
fn stop_in_progress_stops_every_running_type() {
    let mut h = Harness::new();
    h.start(request(
        SERVING_CHANNEL,
        &[(MeasurementKind::ChannelLoad, 20), (MeasurementKind::NoiseHistogram, 40)],
    ))
    .unwrap();
    h.started();
    h.platform.clear_commands();

    h.stop();

    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStop);
    assert_eq!(
        h.platform.kinds(),
        vec![
            CommandKind::ChannelLoadStop,
            CommandKind::NoiseHistogramStop,
            CommandKind::MeasurementStop,
        ]
    );
    assert!(!h.platform.is_running(GuardTimer::MeasurementType(0)));
    assert!(!h.platform.is_running(GuardTimer::MeasurementType(1)));

    h.stopped();
    assert_eq!(
        statuses(&h.replies()[0]),
        vec![MeasurementStatus::Failed; 2]
    );
}

#[test]
fn sparse_noise_histogram_reports_insufficient_samples() {
    let mut h = Harness::new();
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::NoiseHistogram, 20)]))
        .unwrap();
    h.started();
    h.type_expired(0);

    h.respond(CommandResponse {
        kind: CommandKind::ReadNoiseHistogram,
        status: CommandStatus::Ok,
        payload: Some(ReadPayload::NoiseHistogram(NoiseHistogramCounters {
            counts: [10, 20, 20, 0, 0, 0, 0, 0],
        })),
    });
    h.stopped();

    assert_eq!(
        statuses(&h.replies()[0]),
        vec![MeasurementStatus::InsufficientSamples]
    );
}

#[test]
fn rejected_type_start_completes_immediately() {
    let mut h = Harness::new();
    h.platform.reject(CommandKind::ChannelLoadStart);
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::ChannelLoad, 50)]))
        .unwrap();

    h.started();

    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStop);
    assert_eq!(
        h.platform.timer_ops,
        vec![
            TimerOp::Start(GuardTimer::MeasurementStartStop, Duration::from_millis(100)),
            TimerOp::Stop(GuardTimer::MeasurementStartStop),
            TimerOp::Start(GuardTimer::MeasurementType(0), Duration::from_millis(50)),
            TimerOp::Stop(GuardTimer::MeasurementType(0)),
            TimerOp::Start(GuardTimer::MeasurementStartStop, Duration::from_millis(100)),
        ]
    );
}

#[test]
fn start_nack_fails_and_releases() {
    let mut h = Harness::new();
    h.start(request(6, &[(MeasurementKind::Beacon, 20)])).unwrap();
    h.power_report(PsTransition::EnterSuccess);

    h.respond(CommandResponse::failed(CommandKind::MeasurementStart));

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert!(!h.platform.is_running(GuardTimer::MeasurementStartStop));
    let notifications = h.outbox.take_notifications();
    assert_eq!(
        notifications[0],
        MacNotification::MeasurementCommandAccepted(CommandStatus::Failed)
    );
    assert!(matches!(
        &notifications[1],
        MacNotification::MeasurementComplete(reply)
            if reply.types[0].status == MeasurementStatus::Failed
    ));
    assert_eq!(h.platform.last_command().map(FwCommand::kind), Some(CommandKind::SetPowerMode));
}

#[test]
fn start_stop_guard_expiry_escalates() {
    let mut h = Harness::new();
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::Beacon, 20)]))
        .unwrap();

    h.drive(|server, env| server.guard_expired(false, env));

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert_eq!(
        h.outbox.take_failures().as_slice(),
        &[MacFailure::MeasurementFailure]
    );
    assert!(h.replies().is_empty());
}

#[test]
fn start_stop_guard_expiry_releases_the_radio() {
    let mut h = Harness::new();
    h.start(request(6, &[(MeasurementKind::ChannelLoad, 20)]))
        .unwrap();
    h.power_report(PsTransition::EnterSuccess);
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
    assert_eq!(h.power.owner(), Some(DriverClient::Measurement));

    h.drive(|server, env| server.guard_expired(false, env));

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert_eq!(h.power.owner(), None);
    assert_eq!(
        h.outbox.take_failures().as_slice(),
        &[MacFailure::MeasurementFailure]
    );
    assert_eq!(
        h.platform.last_command().map(FwCommand::kind),
        Some(CommandKind::SetPowerMode)
    );

    h.power_report(PsTransition::ExitSuccess);
    assert!(h.replies().is_empty());
    assert_eq!(h.server.last_error(), None);

    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::Beacon, 20)]))
        .unwrap();
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
}

#[test]
fn stop_guard_expiry_releases_the_radio() {
    let mut h = Harness::new();
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::Beacon, 20)]))
        .unwrap();
    h.started();
    h.stop();
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStop);

    h.drive(|server, env| server.guard_expired(false, env));

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert_eq!(h.power.owner(), None);
    assert!(h.platform.running.is_empty());
}

#[test]
fn unbounded_max_delay_never_expires() {
    let mut h = Harness::new();

    h.drive(|server, env| {
        server.start_measurement(
            request(6, &[(MeasurementKind::ChannelLoad, 20)]),
            Duration::MAX,
            env,
        )
    })
    .unwrap();
    h.platform.advance(Duration::from_secs(3_600));
    h.power_report(PsTransition::EnterSuccess);

    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
    assert!(h.replies().is_empty());
}

#[test]
fn malformed_requests_are_refused() {
    let mut h = Harness::new();

    assert_eq!(
        h.start(request(6, &[])),
        Err(MeasurementError::InvalidRequest)
    );
    assert_eq!(
        h.start(request(6, &[(MeasurementKind::Beacon, 0)])),
        Err(MeasurementError::InvalidRequest)
    );
    assert_eq!(
        h.start(request(
            6,
            &[(MeasurementKind::Beacon, 10), (MeasurementKind::Beacon, 20)]
        )),
        Err(MeasurementError::InvalidRequest)
    );

    h.start(request(6, &[(MeasurementKind::Beacon, 10)])).unwrap();
    assert_eq!(
        h.start(request(6, &[(MeasurementKind::Beacon, 10)])),
        Err(MeasurementError::Busy)
    );
}

#[test]
fn firmware_reset_stops_timers_silently() {
    let mut h = Harness::new();
    h.start(request(
        SERVING_CHANNEL,
        &[(MeasurementKind::ChannelLoad, 20), (MeasurementKind::Beacon, 20)],
    ))
    .unwrap();
    h.started();
    h.outbox.take_notifications();

    h.drive(|server, env| server.notify_reset(env));
    let ops = h.platform.timer_ops.len();
    h.drive(|server, env| server.notify_reset(env));

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert!(h.platform.running.is_empty());
    assert_eq!(h.platform.timer_ops.len(), ops);
    assert!(h.replies().is_empty());
}

#[test]
fn unexpected_event_abandons_and_releases() {
    let mut h = Harness::new();
    h.start(request(6, &[(MeasurementKind::Beacon, 20)])).unwrap();

    h.stopped();

    assert_eq!(h.server.state(), MeasurementState::Idle);
    assert_eq!(
        h.server.last_error(),
        Some(UnexpectedMeasurementEvent {
            state: MeasurementState::WaitDriverMode,
            event: "StopComplete",
        })
    );

    h.power_report(PsTransition::EnterSuccess);
    h.power_report(PsTransition::ExitSuccess);
    assert_eq!(h.power.owner(), None);
    assert!(h.replies().is_empty());

    // Nothing left to absorb: the next reservation is honoured.
    h.start(request(SERVING_CHANNEL, &[(MeasurementKind::Beacon, 20)]))
        .unwrap();
    assert_eq!(h.server.state(), MeasurementState::WaitMeasureStart);
}

fn measurement_events() -> Vec<MeasurementEvent> {
    vec![
        MeasurementEvent::Start {
            request: request(6, &[(MeasurementKind::ChannelLoad, 20)]),
            deadline: None,
        },
        MeasurementEvent::DriverModeSuccess {
            now: Instant::from_millis(1_000),
        },
        MeasurementEvent::DriverModeFailure,
        MeasurementEvent::StartSuccess,
        MeasurementEvent::StartFailure,
        MeasurementEvent::TypeStartFailed(0),
        MeasurementEvent::TypeExpired(0),
        MeasurementEvent::ReadResult {
            index: 0,
            status: MeasurementStatus::Success,
            value: MeasurementValue::ChannelLoad(10),
        },
        MeasurementEvent::AllTypesComplete,
        MeasurementEvent::StopRequest {
            send_null_data: false,
        },
        MeasurementEvent::StopComplete,
        MeasurementEvent::GuardExpired,
        MeasurementEvent::FirmwareReset,
    ]
}

fn measurement_machine_in(
    state: MeasurementState,
) -> statig::blocking::StateMachine<MeasurementSm> {
    let events = measurement_events();
    let (start, granted, started) = (&events[0], &events[1], &events[3]);
    let stop = MeasurementEvent::StopRequest {
        send_null_data: false,
    };
    let path: Vec<&MeasurementEvent> = match state {
        MeasurementState::Idle => vec![],
        MeasurementState::WaitDriverMode => vec![start],
        MeasurementState::WaitMeasureStart => vec![start, granted],
        MeasurementState::MeasureInProgress => vec![start, granted, started],
        MeasurementState::WaitMeasureStop => vec![start, granted, started, &stop],
    };

    let mut machine = MeasurementSm::new().state_machine();
    for event in path {
        machine.handle_with_context(event, &mut DispatchContext::default());
    }
    assert_eq!(machine.inner().state_id, state);
    machine
}

/// `None` marks a pair the machine reports as unexpected and drops back to idle for.
fn measurement_next(state: MeasurementState, event: &MeasurementEvent) -> Option<MeasurementState> {
    use MeasurementEvent as E;
    use MeasurementState::*;
    match (state, event) {
        (_, E::FirmwareReset) => Some(Idle),
        (Idle, E::Start { .. }) => Some(WaitDriverMode),
        (
            Idle,
            E::StopRequest { .. } | E::GuardExpired | E::TypeExpired(_) | E::ReadResult { .. },
        ) => Some(Idle),
        (WaitDriverMode, E::DriverModeSuccess { .. }) => Some(WaitMeasureStart),
        (WaitDriverMode, E::DriverModeFailure | E::StopRequest { .. }) => Some(Idle),
        (WaitDriverMode, E::GuardExpired | E::TypeExpired(_) | E::ReadResult { .. }) => {
            Some(WaitDriverMode)
        }
        (WaitMeasureStart, E::StartSuccess) => Some(MeasureInProgress),
        (WaitMeasureStart, E::StartFailure | E::GuardExpired) => Some(Idle),
        (
            WaitMeasureStart,
            E::StopRequest { .. } | E::TypeExpired(_) | E::ReadResult { .. },
        ) => Some(WaitMeasureStart),
        (MeasureInProgress, E::AllTypesComplete | E::StopRequest { .. }) => {
            Some(WaitMeasureStop)
        }
        (
            MeasureInProgress,
            E::TypeStartFailed(_) | E::TypeExpired(_) | E::ReadResult { .. } | E::GuardExpired,
        ) => Some(MeasureInProgress),
        (WaitMeasureStop, E::StopComplete | E::GuardExpired) => Some(Idle),
        (
            WaitMeasureStop,
            E::StopRequest { .. }
            | E::AllTypesComplete
            | E::TypeStartFailed(_)
            | E::TypeExpired(_)
            | E::ReadResult { .. },
        ) => Some(WaitMeasureStop),
        _ => None,
    }
}

#[test]
fn every_measurement_state_event_pair_has_a_defined_outcome() {
    let states = [
        MeasurementState::Idle,
        MeasurementState::WaitDriverMode,
        MeasurementState::WaitMeasureStart,
        MeasurementState::MeasureInProgress,
        MeasurementState::WaitMeasureStop,
    ];
    for state in states {
        for event in measurement_events() {
            let mut machine = measurement_machine_in(state);
            let mut context = DispatchContext::default();
            machine.handle_with_context(&event, &mut context);

            let unexpected = context
                .actions
                .iter()
                .any(|action| matches!(action, MeasurementAction::Unexpected { .. }));
            let name = event.name();
            match measurement_next(state, &event) {
                Some(next) => {
                    assert!(!unexpected, "{state:?} {name} flagged unexpected");
                    assert_eq!(machine.inner().state_id, next, "{state:?} {name}");
                }
                None => {
                    assert!(unexpected, "{state:?} {name} not flagged");
                    assert_eq!(
                        machine.inner().state_id,
                        MeasurementState::Idle,
                        "{state:?} {name}"
                    );
                }
            }

            // Leaving a reserved session for idle always hands the radio back.
            let reserved = matches!(
                state,
                MeasurementState::WaitMeasureStart
                    | MeasurementState::MeasureInProgress
                    | MeasurementState::WaitMeasureStop
            );
            if reserved && machine.inner().state_id == MeasurementState::Idle {
                let released = context
                    .actions
                    .iter()
                    .any(|action| matches!(action, MeasurementAction::Release { .. }));
                assert!(
                    released || matches!(event, MeasurementEvent::FirmwareReset),
                    "{state:?} {name} kept the reservation"
                );
            }
        }
    }
}
