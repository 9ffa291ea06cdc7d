// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print device state in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both vnicadm and integration tests.

use super::nic::NicState;
use super::stat::CounterKey;
use super::worker::WorkerReport;
use std::collections::BTreeMap;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a counter snapshot.
pub fn print_counters(counters: &BTreeMap<CounterKey, u64>) -> std::io::Result<()> {
    print_counters_into(&mut std::io::stdout(), counters)
}

/// Print a counter snapshot into a given writer, one row per
/// counter, grouped by endpoint.
pub fn print_counters_into(
    writer: &mut impl Write,
    counters: &BTreeMap<CounterKey, u64>,
) -> std::io::Result<()> {
    let mut rows: Vec<_> = counters.iter().collect();
    rows.sort_by_key(|(k, _)| (k.port, k.queue, k.kind));

    let mut t = TabWriter::new(writer);
    writeln!(t, "PORT\tQUEUE\tCOUNTER\tVALUE")?;
    write_hr(&mut t)?;
    for (key, val) in rows {
        writeln!(t, "{}\t{}\t{}\t{val}", key.port, key.queue, key.kind)?;
    }
    t.flush()
}

/// Print the configured endpoints.
pub fn print_endpoints(state: &NicState) -> std::io::Result<()> {
    print_endpoints_into(&mut std::io::stdout(), state)
}

pub fn print_endpoints_into(
    writer: &mut impl Write,
    state: &NicState,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "Endpoints (uplink port {})", state.uplink_port)?;
    write_hrb(&mut t)?;
    writeln!(t, "ID\tENABLED\tMAC\tVLAN\tMTU\tOFFLOADS")?;
    write_hr(&mut t)?;
    for (ep, cfg) in &state.endpoints {
        writeln!(
            t,
            "{ep}\t{}\t{}\t{}\t{}\t{:?}",
            cfg.enable, cfg.mac, cfg.vlan, cfg.mtu, cfg.offloads
        )?;
    }
    t.flush()?;

    writeln!(t, "\nAddress table: {}/{}", state.macs.len(), state.macs.capacity())?;
    t.flush()
}

/// Print the totals of stopped worker groups.
pub fn print_workers(reports: &[WorkerReport]) -> std::io::Result<()> {
    print_workers_into(&mut std::io::stdout(), reports)
}

pub fn print_workers_into(
    writer: &mut impl Write,
    reports: &[WorkerReport],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "GROUP\tFRAMES\tDROPS\tEPOCH")?;
    write_hr(&mut t)?;
    for r in reports {
        writeln!(t, "{}\t{}\t{}\t{}", r.id, r.frames, r.drops, r.epoch)?;
    }
    t.flush()
}

/// Print horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
