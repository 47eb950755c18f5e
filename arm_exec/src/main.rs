//! Main arm-side executable entry point.
//!
//! # Architecture
//!
//! A single drawing command is executed per run:
//!
//!     - Initialise the session, logging and parameters
//!     - Build the execution backend (physical arm, simulator, or both)
//!     - Build the drawing board from the taught configurations
//!     - Execute the command through the OXO player
//!     - Flush the trajectory log and calibration report into the session
//!
//! # Usage
//!
//! ```text
//! arm_exec --sim grid 0.2 0.1 0.1 --x 1,1 --o 0,2
//! arm_exec --real --sim --record calibrate 0.2 0.1 0.08
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{info, warn};
use structopt::{clap::AppSettings, StructOpt};

// Internal
use arm_lib::{
    backend::{Backend, KinematicSim, SimBackend},
    board::{CellIndex, DrawingBoard},
    kinematics::{DhChain, DhChainParams, Pose},
    oxo_player::{Mark, OxoPlayer},
    params::ArmExecParams,
    servo_ctrl::ServoCtrl,
    traj_log::TrajRecorder,
    vel_ik::VelIk,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Draws tic-tac-toe with a 6-DOF arm.
#[derive(Debug, StructOpt)]
#[structopt(name = "arm_exec", global_settings = &[AppSettings::AllowNegativeNumbers])]
struct Args {
    /// Drive the physical arm through the arm server.
    #[structopt(long)]
    real: bool,

    /// Run the kinematic simulator. Together with --real the simulator mirrors the arm and
    /// paces the loop.
    #[structopt(long)]
    sim: bool,

    /// Record every control tick into the session directory.
    #[structopt(long)]
    record: bool,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
enum Cmd {
    /// Draw a grid, then optionally marks in its cells.
    #[structopt(name = "grid")]
    Grid {
        /// Grid center along the board x axis in meters.
        cx: f64,

        /// Grid center along the board y axis in meters.
        cy: f64,

        /// Edge length of the grid in meters.
        size: f64,

        /// Cells to draw an X in, as "row,col".
        #[structopt(long = "x")]
        x: Vec<CellIndex>,

        /// Cells to draw an O in, as "row,col".
        #[structopt(long = "o")]
        o: Vec<CellIndex>,
    },

    /// Probe the drawing surface and fit a plane through the touch-downs.
    #[structopt(name = "calibrate")]
    Calibrate {
        /// Sweep center along the board x axis in meters.
        cx: f64,

        /// Sweep center along the board y axis in meters.
        cy: f64,

        /// Edge length of the swept square in meters.
        size: f64,
    },
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::from_args();

    if !(args.real || args.sim) {
        return Err(eyre!("At least one of --real and --sim must be given"));
    }

    // ---- EARLY INITIALISATION ----

    let session = Session::new("arm_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("OXO Arm Executable\n");
    info!("Session directory: {:?}\n", session.session_root);
    info!("Command: {:?}", args.cmd);

    // ---- LOAD PARAMETERS ----

    let params: ArmExecParams =
        util::params::load("arm_exec.toml").wrap_err("Could not load exec params")?;

    let chain_params: DhChainParams = util::params::load(&params.kinematics_file)
        .wrap_err("Could not load the kinematic chain params")?;
    let chain = DhChain::new(&chain_params).wrap_err("Invalid kinematic chain")?;

    let dt = util::time::period_s(params.control_frequency_hz).ok_or_else(|| {
        eyre!(
            "Invalid control frequency {} Hz",
            params.control_frequency_hz
        )
    })?;

    info!(
        "Exec parameters loaded, {} chain at {} Hz",
        chain.name(),
        params.control_frequency_hz
    );

    // ---- INITIALISE MODULES ----

    let backend = build_backend(&args, &params, dt)?;

    let (origin_q, x_q, y_q) = params.board.taught_joints();
    let board = DrawingBoard::from_taught_configs(&chain, &origin_q, &x_q, &y_q)
        .wrap_err("Could not build the drawing board frame")?;
    info!(
        "Drawing board origin at {:?}",
        board.origin().translation.vector.as_slice()
    );

    let boundary = if params.boundary_enabled {
        let b = board.safety_boundary(&params.boundary);
        info!("Safety boundary at z = {:.4} m", b.z_m);
        Some(b)
    } else {
        warn!("Safety boundary disabled");
        None
    };

    let mut ctrl = ServoCtrl::new(chain, backend, VelIk::new(params.vel_ik), boundary);

    let recorder = if args.record {
        let r = TrajRecorder::new();
        ctrl.set_sink(Box::new(r.clone()));
        Some(r)
    } else {
        None
    };

    let mut player = OxoPlayer::new(ctrl, board, params.player.clone(), params.servo);

    info!("Module initialisation complete\n");

    // ---- EXECUTE ----

    let result = execute(&mut player, &args.cmd, &session);

    if let Some(r) = recorder {
        r.flush_to_session(&session, cmd_name(&args.cmd));
    }

    let ctrl = player.ctrl();
    info!(
        "{} ticks executed, {} velocity IK failures",
        ctrl.num_ticks(),
        ctrl.num_ik_failures()
    );

    // ---- SHUTDOWN ----

    info!("End of execution");
    session.exit();

    result
}

/// Run the command through the player.
fn execute<B: Backend>(
    player: &mut OxoPlayer<DhChain, B>,
    cmd: &Cmd,
    session: &Session,
) -> Result<(), Report> {
    match cmd {
        Cmd::Grid { cx, cy, size, x, o } => {
            let report = player
                .draw_grid(&Pose::translation(*cx, *cy, 0.0), *size)
                .wrap_err("Failed to draw the grid")?;
            info!("Grid drawn in {} ticks", report.ticks);

            let marks = x
                .iter()
                .map(|c| (Mark::X, *c))
                .chain(o.iter().map(|c| (Mark::O, *c)));

            for (mark, cell) in marks {
                let report = player
                    .draw_mark(mark, cell)
                    .wrap_err_with(|| format!("Failed to draw {:?} in cell {}", mark, cell))?;
                info!("{:?} drawn in {} ticks", mark, report.ticks);
            }
        }
        Cmd::Calibrate { cx, cy, size } => {
            let report = player
                .calibrate(&Pose::translation(*cx, *cy, 0.0), *size)
                .wrap_err("Failed to calibrate the surface")?;

            session.save("calibration.json", report);
        }
    }

    Ok(())
}

/// Build the backend selected on the command line.
fn build_backend(args: &Args, params: &ArmExecParams, dt: f64) -> Result<Box<dyn Backend>, Report> {
    if args.real {
        // A simulator mirroring the arm governs the loop timing, so it always runs in real time
        let mirror = if args.sim {
            Some(KinematicSim::new(params.sim_initial_joints(), true))
        } else {
            None
        };

        return hardware_backend(mirror, dt);
    }

    info!(
        "Simulated arm, {}",
        if params.sim_realtime {
            "real time"
        } else {
            "as fast as possible"
        }
    );

    Ok(Box::new(SimBackend::new(
        KinematicSim::new(params.sim_initial_joints(), params.sim_realtime),
        dt,
    )))
}

#[cfg(feature = "hardware")]
fn hardware_backend(mirror: Option<KinematicSim>, dt: f64) -> Result<Box<dyn Backend>, Report> {
    use arm_lib::{arm_client::ArmClient, backend::HardwareBackend};
    use comms_if::net::{zmq, NetParams};

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;

    let zmq_ctx = zmq::Context::new();
    let client = ArmClient::new(&zmq_ctx, &net_params).wrap_err("Failed to initialise ArmClient")?;
    info!(
        "ArmClient initialised on {}{}",
        net_params.arm_endpoint,
        if mirror.is_some() { ", mirrored in simulation" } else { "" }
    );

    Ok(Box::new(HardwareBackend::new(client, mirror, dt)))
}

#[cfg(not(feature = "hardware"))]
fn hardware_backend(_mirror: Option<KinematicSim>, _dt: f64) -> Result<Box<dyn Backend>, Report> {
    Err(eyre!("--real requires the \"hardware\" feature"))
}

fn cmd_name(cmd: &Cmd) -> &'static str {
    match cmd {
        Cmd::Grid { .. } => "grid",
        Cmd::Calibrate { .. } => "calibrate",
    }
}
