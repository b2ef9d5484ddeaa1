use groundlink_shm::{
    GroundStatus, RcChannels, RcOverrides, RcStatus, RetryPolicy, SharedRecord, StateChannel,
    UavStatus,
};
use serde_json::Value;

use crate::cmd::{ChannelArgs, ChannelKind, ShmArgs, ShmCommand};
use crate::exit::{shm_error, CliResult, SUCCESS};
use crate::output::{
    ground_status_fields, print_snapshot, rc_overrides_fields, rc_status_fields,
    rc_values_fields, uav_status_fields, OutputFormat, Snapshot,
};

pub fn run(args: ShmArgs, format: OutputFormat) -> CliResult<i32> {
    let snapshot = match args.command {
        ShmCommand::Show(target) => show(&target)?,
        ShmCommand::Init(target) => init(&target)?,
    };
    print_snapshot(&snapshot, format);
    Ok(SUCCESS)
}

/// Read a channel some other process created. Never creates or truncates.
fn show(target: &ChannelArgs) -> CliResult<Snapshot> {
    let name = target.name.as_deref();
    match target.kind {
        ChannelKind::GroundStatus => read::<GroundStatus>(name, ground_status_fields),
        ChannelKind::RcStatus => read::<RcStatus>(name, rc_status_fields),
        ChannelKind::UavStatus => read::<UavStatus>(name, uav_status_fields),
        ChannelKind::RcValues => read::<RcChannels>(name, rc_values_fields),
        ChannelKind::RcOverrides => read::<RcOverrides>(name, rc_overrides_fields),
    }
}

/// Create-or-open a channel and write its first-writer defaults.
fn init(target: &ChannelArgs) -> CliResult<Snapshot> {
    let name = target.name.as_deref();
    match target.kind {
        ChannelKind::GroundStatus => reset::<GroundStatus>(name, ground_status_fields),
        ChannelKind::RcStatus => reset::<RcStatus>(name, rc_status_fields),
        ChannelKind::UavStatus => reset::<UavStatus>(name, uav_status_fields),
        ChannelKind::RcValues => reset::<RcChannels>(name, rc_values_fields),
        ChannelKind::RcOverrides => reset::<RcOverrides>(name, rc_overrides_fields),
    }
}

fn read<T: SharedRecord>(
    name: Option<&str>,
    fields: fn(&T) -> Vec<(String, Value)>,
) -> CliResult<Snapshot> {
    let name = name.unwrap_or(T::NAME);
    let channel = StateChannel::<T>::open_existing_named(name)
        .map_err(|err| shm_error(&format!("cannot open {name}"), err))?;
    Ok(snapshot(&channel, fields))
}

fn reset<T: SharedRecord>(
    name: Option<&str>,
    fields: fn(&T) -> Vec<(String, Value)>,
) -> CliResult<Snapshot> {
    let name = name.unwrap_or(T::NAME);
    // An interactive tool should fail fast instead of waiting on a producer.
    let policy = RetryPolicy {
        max_attempts: Some(1),
        ..RetryPolicy::default()
    };
    let channel = StateChannel::<T>::create_or_open_named(name, &policy)
        .map_err(|err| shm_error(&format!("cannot create {name}"), err))?;
    channel.default_init();
    Ok(snapshot(&channel, fields))
}

fn snapshot<T: SharedRecord>(
    channel: &StateChannel<T>,
    fields: fn(&T) -> Vec<(String, Value)>,
) -> Snapshot {
    Snapshot {
        channel: channel.name().to_string(),
        size: channel.size(),
        fields: fields(&channel.load()),
    }
}
