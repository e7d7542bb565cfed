// 50 Hz loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if teleop crashes and stops sending commands, the base would keep driving
// on the last command it received

use std::time::Instant;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::{
    CMD_TIMEOUT, DriveConfig, TOPIC_CMD_BASE, TOPIC_HEALTH, TOPIC_IMU, TOPIC_MODULES,
    TOPIC_POSE,
};
use crate::drive::geometry::MODULE_COUNT;
use crate::drive::{DriveController, DriveError, Periodic, Pose};
use crate::hardware::{Gyro, WheelHardware};
use crate::imu::RemoteGyro;
use crate::messages::{DriveCommand, ImuSample, ModuleReport, PoseReport, RuntimeHealth};
use crate::motor::open_wheels;
use crate::sim::SimulatedBase;

pub struct Runtime<H, G> {
    drive: DriveController<H, G>,
    /// Last continuous command (drive or lock), replayed every cycle until stale
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    stopped: bool,
    faulted: bool,
    health: RuntimeHealth,
}

impl<H: WheelHardware, G: Gyro> Runtime<H, G> {
    pub fn new(drive: DriveController<H, G>) -> Self {
        Self {
            drive,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            stopped: true,
            faulted: false,
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Take in a command. One-shot commands act immediately.
    pub fn on_command(&mut self, cmd: DriveCommand, now: Instant) -> Result<(), DriveError> {
        if cmd.is_continuous() {
            if self.latest_cmd.is_none() {
                info!("Received command: {:?}", cmd);
            }
            self.latest_cmd = Some(cmd);
            self.cmd_received_at = now;
            return Ok(());
        }

        info!("Received command: {:?}", cmd);
        match cmd {
            DriveCommand::Stop => {
                self.latest_cmd = None;
                self.stopped = true;
                self.drive.stop()
            }
            DriveCommand::ZeroHeading => {
                self.drive.zero_heading();
                Ok(())
            }
            DriveCommand::ResetPose { x, y, heading } => {
                self.drive.reset_pose(Pose::new(x, y, heading))
            }
            DriveCommand::ResetDistances => self.drive.reset_distances(),
            DriveCommand::Drive { .. } | DriveCommand::Lock => Ok(()),
        }
    }

    /// Run one control cycle (includes watchdog logic)
    pub fn step(&mut self, now: Instant) -> Result<RuntimeHealth, DriveError> {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        let active = match self.latest_cmd {
            Some(cmd) if cmd_age <= CMD_TIMEOUT => Some(cmd),
            Some(_) => {
                // Watchdog triggered - stop the robot
                warn!("Command stale ({:?} old), stopping robot", cmd_age);
                self.latest_cmd = None;
                None
            }
            None => None,
        };

        match active {
            Some(DriveCommand::Drive {
                x,
                y,
                rot,
                field_relative,
            }) => {
                self.stopped = false;
                self.drive.drive(x, y, rot, field_relative)?;
            }
            Some(DriveCommand::Lock) => {
                self.stopped = false;
                self.drive.lock()?;
            }
            _ if !self.stopped => {
                self.drive.stop()?;
                self.stopped = true;
            }
            _ => {}
        }

        self.drive.tick(now)?;
        self.health = RuntimeHealth::assess(active.is_none(), self.drive.calibration_state());
        Ok(self.health)
    }

    /// `step`, but a hardware error only skips the cycle. Logged once per fault.
    pub fn step_or_log(&mut self, now: Instant) -> RuntimeHealth {
        match self.step(now) {
            Ok(health) => {
                if self.faulted {
                    info!("Drive recovered");
                    self.faulted = false;
                }
                health
            }
            Err(e) => {
                if !self.faulted {
                    error!("Drive cycle failed: {}", e);
                    self.faulted = true;
                }
                // Try to leave the wheels stopped; a fresh command restarts them
                self.stopped = self.drive.stop().is_ok();
                self.health
            }
        }
    }

    pub fn pose_report(&self) -> PoseReport {
        PoseReport::new(self.drive.pose(), self.drive.heading_degrees(), self.drive.turn_rate())
    }

    pub fn module_report(&mut self) -> Result<ModuleReport, DriveError> {
        Ok(ModuleReport {
            states: self.drive.module_states()?.to_vec(),
            desired: self.drive.desired_states().to_vec(),
            average_distance: self.drive.average_distance()?,
        })
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn drive(&self) -> &DriveController<H, G> {
        &self.drive
    }
}

/// How `run` gets at the robot
pub struct RunOptions {
    pub config: DriveConfig,
    pub port: String,
    pub simulate: bool,
}

/// What has to happen outside the drive every cycle
enum Backend {
    Hardware(RemoteGyro),
    Simulated(SimulatedBase),
}

type BoxedRuntime = Runtime<Box<dyn WheelHardware>, Box<dyn Gyro>>;

type BoxedWheels = [Box<dyn WheelHardware>; MODULE_COUNT];

fn build(
    options: &RunOptions,
    now: Instant,
) -> Result<(BoxedRuntime, Backend), Box<dyn std::error::Error + Send + Sync>> {
    let config = options.config.clone();
    let (wheels, gyro, backend): (BoxedWheels, Box<dyn Gyro>, Backend) = if options.simulate {
        info!("Simulating drive hardware");
        let base = SimulatedBase::new(&config)?;
        let wheels = base.wheels.clone().map(|w| Box::new(w) as Box<dyn WheelHardware>);
        let gyro: Box<dyn Gyro> = Box::new(base.gyro.clone());
        (wheels, gyro, Backend::Simulated(base))
    } else {
        let wheels = open_wheels(&options.port, &config)?
            .map(|w| Box::new(w) as Box<dyn WheelHardware>);
        let gyro = RemoteGyro::new();
        (wheels, Box::new(gyro.clone()) as Box<dyn Gyro>, Backend::Hardware(gyro))
    };

    let drive = DriveController::new(config, wheels, gyro, now)?;
    Ok((Runtime::new(drive), backend))
}

pub async fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut runtime, backend) = build(&options, Instant::now())?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_BASE).await?;
    let sub_imu = session.declare_subscriber(TOPIC_IMU).await?;
    let pub_pose = session.declare_publisher(TOPIC_POSE).await?;
    let pub_modules = session.declare_publisher(TOPIC_MODULES).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let period = options.config.loop_period;
    let mut tick = interval(period);

    info!(
        "Runtime started: {:?} loop, {}ms watchdog timeout",
        period,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", TOPIC_CMD_BASE, TOPIC_IMU);
    info!("Publishing to: {}, {}, {}", TOPIC_POSE, TOPIC_MODULES, TOPIC_HEALTH);

    loop {
        tick.tick().await;
        let now = Instant::now();

        // 1. Drain all pending heading samples, keep latest
        while let Ok(Some(sample)) = sub_imu.try_recv() {
            let payload = sample.payload().to_bytes();
            match (serde_json::from_slice::<ImuSample>(&payload), &backend) {
                (Ok(imu), Backend::Hardware(gyro)) => gyro.feed(imu, now),
                (Ok(_), Backend::Simulated(_)) => {}
                (Err(e), _) => warn!("Failed to parse IMU sample: {}", e),
            }
        }

        // 2. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => {
                    if let Err(e) = runtime.on_command(cmd, now) {
                        error!("Command {:?} failed: {}", cmd, e);
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 3. Drive, watchdog, odometry, calibration
        let health = runtime.step_or_log(now);
        if let Backend::Simulated(base) = &backend {
            base.step(period.as_secs_f64());
        }

        // 4. Publish telemetry
        pub_pose.put(serde_json::to_string(&runtime.pose_report())?).await?;
        if let Ok(modules) = runtime.module_report() {
            pub_modules.put(serde_json::to_string(&modules)?).await?;
        }
        pub_health.put(serde_json::to_string(&health)?).await?;
    }
}
