// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use slog::Drain;

use vnic::ExecCtx;
use vnic::api::Direction;
use vnic::api::EndpointId;
use vnic::api::MacAddr;
use vnic::api::VnicCfg;
use vnic::engine::Destination;
use vnic::engine::frame::Frame;
use vnic::engine::print::print_counters;
use vnic::engine::print::print_endpoints;
use vnic::engine::print::print_workers;
use vnic::engine::reconfig::QueuedSource;
use vnic::provider::SlogLog;
use vnicadm::CaptureTransport;
use vnicadm::Device;
use vnicadm::DeviceCfg;
use vnicadm::counter_rows;
use vnicadm::read_capture;
use vnicadm::write_capture;

/// Administer a software vNIC data plane.
///
/// Every command loads a device description, runs the device in this
/// process, and stops it again before exiting.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Validate a device description and print its endpoints.
    Check { device: PathBuf },

    /// Replay a packet capture through the RX or TX pipeline.
    Replay {
        device: PathBuf,
        capture: PathBuf,

        /// The endpoint (RX: ingress port, TX: sending endpoint).
        #[arg(short)]
        port: EndpointId,

        #[arg(long = "dir")]
        direction: Direction,

        /// Write every forwarded frame to this capture file.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Print the counters as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Apply a new configuration to an endpoint of a running device.
    Reconfig {
        device: PathBuf,

        #[arg(short)]
        port: EndpointId,

        /// TOML file holding the endpoint's configuration.
        cfg: PathBuf,
    },

    /// Add an address table entry.
    AddMac {
        device: PathBuf,

        #[arg(short)]
        port: EndpointId,

        mac: MacAddr,
    },

    /// Remove an address table entry.
    RmMac { device: PathBuf, mac: MacAddr },
}

fn logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("unit" => "vnicadm"))
}

fn start(ectx: &Arc<ExecCtx>, device: &Path) -> anyhow::Result<Device> {
    let cfg = DeviceCfg::load(device)?;
    Device::start(Arc::clone(ectx), &cfg, Arc::new(CaptureTransport::new()))
}

fn dest_name(dest: &Destination) -> String {
    match dest {
        Destination::Host { ep, queue } => format!("host {ep}/{queue}"),
        Destination::Wire { port } => format!("wire {port}"),
        Destination::Drop => "drop".to_string(),
    }
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let ectx = Arc::new(ExecCtx { log: Box::new(SlogLog(logger())) });

    match cmd {
        Command::Check { device } => {
            let cfg = DeviceCfg::load(&device)?;
            let st = cfg.initial_state()?;
            println!("{} worker groups, {} queues", cfg.workers, cfg.queues);
            print_endpoints(&st)?;
        }

        Command::Replay { device, capture, port, direction, out, json } => {
            let cfg = DeviceCfg::load(&device)?;
            let bytes = std::fs::read(&capture)
                .with_context(|| format!("read {}", capture.display()))?;
            let frames = read_capture(&bytes)?;

            let transport = Arc::new(CaptureTransport::new());
            let dev = Device::start(ectx, &cfg, transport.clone())?;
            for f in &frames {
                dev.submit(direction, Frame::new(port, f))?;
            }
            let stats = dev.stats();
            let reports = dev.shutdown();
            let delivered = transport.take();

            if let Some(out) = out {
                let mut file = File::create(&out)
                    .with_context(|| format!("create {}", out.display()))?;
                let forwarded = delivered
                    .iter()
                    .filter(|(d, _)| *d != Destination::Drop)
                    .map(|(_, b)| b.as_slice());
                write_capture(&mut file, forwarded)?;
            }

            let counters = stats.snapshot();
            if json {
                let rows = counter_rows(&counters);
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }

            let mut by_dest = BTreeMap::new();
            for (dest, _) in &delivered {
                *by_dest.entry(dest_name(dest)).or_insert(0u64) += 1;
            }

            println!("{direction} replay of {} frames", frames.len());
            for (dest, n) in &by_dest {
                println!("  {dest}: {n}");
            }
            println!();
            print_workers(&reports)?;
            println!();
            print_counters(&counters)?;
        }

        Command::Reconfig { device, port, cfg } => {
            let text = std::fs::read_to_string(&cfg)
                .with_context(|| format!("read {}", cfg.display()))?;
            let new_cfg: VnicCfg = toml::from_str(&text)
                .with_context(|| format!("parse {}", cfg.display()))?;

            let dev = start(&ectx, &device)?;
            let mut src = QueuedSource::new();
            src.push(port, new_cfg);
            dev.coordinator().service(&mut src);
            let result = src.completed().first().map(|(_, r)| r.clone());
            let st = dev.state();
            dev.shutdown();

            match result {
                Some(Ok(epoch)) => {
                    println!("endpoint {port} at epoch {epoch}");
                    print_endpoints(&st)?;
                }
                Some(Err(e)) => {
                    return Err(e).context(format!("reconfigure endpoint {port}"));
                }
                None => anyhow::bail!("no change was serviced"),
            }
        }

        Command::AddMac { device, port, mac } => {
            let dev = start(&ectx, &device)?;
            let res = dev.coordinator().add_mac(mac, port);
            dev.shutdown();
            let epoch = res.with_context(|| format!("add {mac}"))?;
            println!("{mac} -> endpoint {port} at epoch {epoch}");
        }

        Command::RmMac { device, mac } => {
            let dev = start(&ectx, &device)?;
            let res = dev.coordinator().remove_mac(mac);
            dev.shutdown();
            match res.with_context(|| format!("remove {mac}"))? {
                (Some(ep), epoch) => {
                    println!("{mac} removed from endpoint {ep} at epoch {epoch}")
                }
                (None, _) => println!("{mac} not in the address table"),
            }
        }
    }

    Ok(())
}
