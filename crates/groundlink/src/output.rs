use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use groundlink_shm::{GroundStatus, RcChannels, RcOverrides, RcStatus, UavStatus};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A point-in-time copy of one state channel, flattened for display.
#[derive(Debug)]
pub struct Snapshot {
    pub channel: String,
    pub size: usize,
    pub fields: Vec<(String, Value)>,
}

#[derive(Serialize)]
struct SnapshotOutput<'a> {
    channel: &'a str,
    size: usize,
    fields: serde_json::Map<String, Value>,
}

pub fn print_snapshot(snapshot: &Snapshot, format: OutputFormat) {
    print!("{}", render_snapshot(snapshot, format));
}

pub fn render_snapshot(snapshot: &Snapshot, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let out = SnapshotOutput {
                channel: &snapshot.channel,
                size: snapshot.size,
                fields: snapshot.fields.iter().cloned().collect(),
            };
            let mut line = serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string());
            line.push('\n');
            line
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (name, value) in &snapshot.fields {
                table.add_row(vec![name.clone(), display_value(value)]);
            }
            format!("{} ({} bytes)\n{table}\n", snapshot.channel, snapshot.size)
        }
        OutputFormat::Pretty => {
            let mut out = format!("channel={} size={}\n", snapshot.channel, snapshot.size);
            for (name, value) in &snapshot.fields {
                out.push_str(&format!("  {name}={}\n", display_value(value)));
            }
            out
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field(name: &str, value: impl Into<Value>) -> (String, Value) {
    (name.to_string(), value.into())
}

pub fn ground_status_fields(s: &GroundStatus) -> Vec<(String, Value)> {
    let adapters: Vec<Value> = s
        .adapter
        .iter()
        .take(s.wifi_adapter_cnt as usize)
        .map(|a| {
            json!({
                "name": a.name(),
                "received_packet_cnt": a.received_packet_cnt,
                "current_signal_dbm": a.current_signal_dbm,
                "type": a.adapter_type,
            })
        })
        .collect();
    vec![
        field("last_update", s.last_update),
        field("damaged_block_cnt", s.damaged_block_cnt),
        field("lost_packet_cnt", s.lost_packet_cnt),
        field("received_packet_cnt", s.received_packet_cnt),
        field("kbitrate", s.kbitrate),
        field("kbitrate_measured", s.kbitrate_measured),
        field("kbitrate_set", s.kbitrate_set),
        field("cpuload_gnd", f64::from(s.cpuload_gnd)),
        field("temp_gnd", f64::from(s.temp_gnd)),
        field("wifi_adapter_cnt", s.wifi_adapter_cnt),
        field("adapters", adapters),
    ]
}

pub fn rc_status_fields(s: &RcStatus) -> Vec<(String, Value)> {
    vec![
        field("last_update", s.last_update),
        field("packets_sent", s.packets_sent),
        field("lost_packet_cnt_rc", s.lost_packet_cnt_rc),
        field("received_packet_cnt_uav", s.received_packet_cnt_uav),
        field("rssi_rc_uav", s.rssi_rc_uav),
        field("adapter_rssi", s.adapter_rssi),
    ]
}

pub fn uav_status_fields(s: &UavStatus) -> Vec<(String, Value)> {
    vec![
        field("last_update", s.last_update),
        field("latitude", f64::from(s.latitude) / 1e7),
        field("longitude", f64::from(s.longitude) / 1e7),
        field("altitude_m", f64::from(s.altitude_mm) / 1e3),
        field("injected_packet_cnt", s.injected_packet_cnt),
        field("battery_voltage_mv", s.battery_voltage_mv),
        field("battery_current_ca", s.battery_current_ca),
        field("battery_remaining_pct", s.battery_remaining_pct),
        field("cpu_usage", s.cpu_usage),
        field("cpu_temp", s.cpu_temp),
        field("undervolt", s.undervolt),
        field("rssi_ground", s.rssi_ground),
        field("gps_fix_type", s.gps_fix_type),
        field("satellites_visible", s.satellites_visible),
    ]
}

pub fn rc_channel_fields(channels: &[u16]) -> Vec<(String, Value)> {
    channels
        .iter()
        .enumerate()
        .map(|(i, &v)| field(&format!("ch{}", i + 1), v))
        .collect()
}

pub fn rc_values_fields(rc: &RcChannels) -> Vec<(String, Value)> {
    rc_channel_fields(&rc.ch)
}

pub fn rc_overrides_fields(ov: &RcOverrides) -> Vec<(String, Value)> {
    let mut fields = rc_channel_fields(&ov.ch);
    fields.push(field("active", ov.is_active()));
    fields
}
