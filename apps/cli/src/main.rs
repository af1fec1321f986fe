//! EVM CLI - Attach, format and mount an EBS volume on the current instance.
//!
//! All options can also be provided through `EVM_*` environment variables.

mod logging;

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use evm_core::attach::PollPolicy;
use evm_core::backoff::SystemClock;
use evm_core::credentials::Credentials;
use evm_core::ec2::Ec2Client;
use evm_core::host::SystemHost;
use evm_core::metadata::{DEFAULT_ENDPOINT, ImdsClient};
use evm_core::{AttachOutcome, Environment, ReconcileInput};
use tracing::{debug, error, info};

use crate::logging::LogConfig;

/// Mount and configure an EBS volume within and onto an EC2 instance.
#[derive(Parser)]
#[command(name = "evm", version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "EVM_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EVM_LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount and configure an EBS volume.
    Mount(MountArgs),
}

#[derive(Args)]
struct MountArgs {
    /// Name of the block device to use locally (required)
    #[arg(short = 'b', long, env = "EVM_BLOCK_DEVICE_NAME", default_value = "")]
    block_device_name: String,

    /// Type of filesystem to use for the volume
    #[arg(short = 'f', long, env = "EVM_FILESYSTEM_TYPE", default_value = "ext4")]
    filesystem_type: String,

    /// Location to mount the volume (required)
    #[arg(short = 'm', long, env = "EVM_MOUNT_POINT", default_value = "")]
    mount_point: String,

    /// Name of the EBS volume to attach to this instance (required)
    #[arg(short = 'v', long, env = "EVM_VOLUME_NAME", default_value = "")]
    volume_name: String,

    /// Give up waiting for the attachment after this many seconds
    #[arg(long, env = "EVM_ATTACH_TIMEOUT")]
    attach_timeout: Option<u64>,

    #[arg(
        long,
        env = "AWS_EC2_METADATA_SERVICE_ENDPOINT",
        default_value = DEFAULT_ENDPOINT,
        hide = true
    )]
    metadata_endpoint: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: cli.log_level,
        format: cli.log_format,
    };
    let subscriber = match log_config.build() {
        Ok(subscriber) => subscriber,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::subscriber::with_default(subscriber, || match cli.command {
        Commands::Mount(args) => run_mount(args),
    })
}

fn run_mount(args: MountArgs) -> ExitCode {
    let start = Instant::now();

    let metadata = ImdsClient::new(args.metadata_endpoint);
    let env = Environment {
        metadata: &metadata,
        host: &SystemHost,
        clock: &SystemClock,
        poll_policy: PollPolicy::default()
            .with_deadline(args.attach_timeout.map(Duration::from_secs)),
    };
    let input = ReconcileInput {
        device_name: args.block_device_name,
        filesystem_type: args.filesystem_type,
        mount_point: args.mount_point,
        volume_name: args.volume_name,
    };

    let result = evm_core::reconcile(input, &env, |identity| {
        let credentials = Credentials::resolve(&metadata)?;
        Ok(Ec2Client::new(&identity.region, credentials))
    });

    let code = match result {
        Ok(outcome) => {
            match outcome.attach {
                AttachOutcome::AlreadyAttached => debug!("No attachment change was needed"),
                AttachOutcome::Attached { polls } => {
                    debug!("Attachment confirmed after {} polls", polls)
                }
            }
            info!(
                "Volume {} is attached and mounted on instance {}",
                outcome.volume_id, outcome.identity.instance_id
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    };

    debug!("Total execution time: {:?}", start.elapsed());
    code
}
