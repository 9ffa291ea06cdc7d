// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! vNIC device administration library.
//!
//! A device is described by a TOML file and run in this process: one
//! thread per worker group, a configuration coordinator, and a link
//! monitor.

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use vnic::ExecCtx;
use vnic::api::Direction;
use vnic::api::EndpointId;
use vnic::api::RssCfg;
use vnic::api::VnicCfg;
use vnic::ddi::sync::KMutex;
use vnic::dynamic::Dynamic;
use vnic::engine::DeliveryError;
use vnic::engine::Destination;
use vnic::engine::Transport;
use vnic::engine::cam::MAX_CAM_BUCKETS;
use vnic::engine::frame::Frame;
use vnic::engine::link::LinkMonitor;
use vnic::engine::link::LinkStatus;
use vnic::engine::nic::NicState;
use vnic::engine::reconfig::Coordinator;
use vnic::engine::reconfig::WireControl;
use vnic::engine::stat::CounterKey;
use vnic::engine::stat::MemStats;
use vnic::engine::worker::Work;
use vnic::engine::worker::WorkerCtx;
use vnic::engine::worker::WorkerGroup;
use vnic::engine::worker::WorkerReport;
use vnic::provider::LogLevel;

/// Largest frame a capture may carry.
pub const CAPTURE_SNAPLEN: u32 = 65535;

/// A device description, as read from its TOML file.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceCfg {
    /// Number of worker groups.
    pub workers: usize,
    /// Receive queues per endpoint, used for endpoints that leave
    /// their RSS indirection table unset.
    pub queues: u8,
    pub uplink_port: u8,
    /// Buckets in the MAC address table.
    pub cam_buckets: usize,
    pub link_up: bool,
    pub link_poll_ms: u64,
    #[serde(rename = "endpoint")]
    pub endpoints: Vec<EndpointEntry>,
}

impl Default for DeviceCfg {
    fn default() -> Self {
        Self {
            workers: 1,
            queues: 1,
            uplink_port: 0,
            cam_buckets: 256,
            link_up: true,
            link_poll_ms: 100,
            endpoints: vec![],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointEntry {
    pub id: EndpointId,
    #[serde(default)]
    pub cfg: VnicCfg,
}

impl DeviceCfg {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_toml(&s).with_context(|| format!("parse {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("a device needs at least one worker group");
        }

        if self.queues == 0 {
            bail!("a device needs at least one queue per endpoint");
        }

        if self.cam_buckets == 0 || self.cam_buckets > MAX_CAM_BUCKETS {
            bail!(
                "cam_buckets must be between 1 and {MAX_CAM_BUCKETS}, not {}",
                self.cam_buckets
            );
        }

        let mut seen = BTreeSet::new();
        for ep in &self.endpoints {
            if !seen.insert(ep.id) {
                bail!("endpoint {} described twice", ep.id);
            }
        }

        Ok(())
    }

    /// The configuration `ep` starts with.
    pub fn endpoint_cfg(&self, ep: &EndpointEntry) -> VnicCfg {
        let mut cfg = ep.cfg.clone();
        if cfg.rss.table == RssCfg::default().table {
            cfg.rss.table = RssCfg::with_queues(self.queues).table;
        }
        cfg
    }

    /// Build the state the device reaches once every endpoint is
    /// installed, without starting it.
    pub fn initial_state(&self) -> anyhow::Result<NicState> {
        let mut st = NicState::new(self.cam_buckets, self.uplink_port);
        for ep in &self.endpoints {
            st.set_endpoint(ep.id, self.endpoint_cfg(ep))
                .with_context(|| format!("endpoint {}", ep.id))?;
        }
        Ok(st)
    }
}

/// Tracks which endpoints have wire RX turned on.
#[derive(Clone, Default)]
pub struct WireGate(Arc<KMutex<BTreeSet<EndpointId>>>);

impl WireGate {
    pub fn enabled(&self) -> BTreeSet<EndpointId> {
        self.0.lock().clone()
    }
}

impl WireControl for WireGate {
    fn set_rx_enabled(&self, ep: EndpointId, enabled: bool) {
        let mut eps = self.0.lock();
        if enabled {
            eps.insert(ep);
        } else {
            eps.remove(&ep);
        }
    }
}

/// A transport that keeps every frame handed to it.
#[derive(Default)]
pub struct CaptureTransport {
    frames: KMutex<Vec<(Destination, Vec<u8>)>>,
}

impl CaptureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the frames delivered so far.
    pub fn take(&self) -> Vec<(Destination, Vec<u8>)> {
        std::mem::take(&mut *self.frames.lock())
    }
}

impl Transport for CaptureTransport {
    fn deliver(
        &self,
        frame: &Frame,
        dest: Destination,
    ) -> Result<(), DeliveryError> {
        self.frames.lock().push((dest, frame.bytes().to_vec()));
        Ok(())
    }
}

/// A device running in this process.
pub struct Device {
    ectx: Arc<ExecCtx>,
    coord: Coordinator,
    groups: Vec<WorkerGroup>,
    stats: Arc<MemStats>,
    wire: WireGate,
    stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl Device {
    /// Start the worker groups and link monitor, then bring up every
    /// endpoint in `cfg` through the coordinator.
    pub fn start(
        ectx: Arc<ExecCtx>,
        cfg: &DeviceCfg,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;

        let state =
            Dynamic::from(NicState::new(cfg.cam_buckets, cfg.uplink_port));
        let wire = WireGate::default();
        let mut coord = Coordinator::new(
            Arc::clone(&ectx),
            state.clone(),
            Box::new(wire.clone()),
        );
        let stats = Arc::new(MemStats::new());
        let link = Arc::new(LinkStatus::new(cfg.link_up));

        let ctx = WorkerCtx {
            ectx: Arc::clone(&ectx),
            link: Arc::clone(&link),
            stats: stats.clone(),
            transport,
            counter: coord.counter(),
        };

        let mut groups = Vec::with_capacity(cfg.workers);
        for id in 0..cfg.workers {
            let group = WorkerGroup::spawn(id, ctx.clone(), state.load())
                .with_context(|| format!("spawn worker group {id}"))?;
            coord.attach(group.control());
            groups.push(group);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let up = cfg.link_up;
        let mut mon = LinkMonitor::new(
            Arc::clone(&ectx),
            link,
            Box::new(move || up),
            state,
        );
        let interval = Duration::from_millis(cfg.link_poll_ms);
        let mon_stop = Arc::clone(&stop);
        let monitor = std::thread::Builder::new()
            .name("vnic-link".to_string())
            .spawn(move || mon.run(interval, &mon_stop))
            .context("spawn link monitor")?;

        let dev = Self {
            ectx,
            coord,
            groups,
            stats,
            wire,
            stop,
            monitor: Some(monitor),
        };

        for ep in &cfg.endpoints {
            dev.coord
                .reconfigure(ep.id, cfg.endpoint_cfg(ep))
                .with_context(|| format!("bring up endpoint {}", ep.id))?;
        }

        Ok(dev)
    }

    /// Queue a frame. Frames from one port always land on the same
    /// group and so keep their order.
    pub fn submit(&self, dir: Direction, frame: Frame) -> anyhow::Result<()> {
        let idx = usize::from(frame.port) % self.groups.len();
        let group = &self.groups[idx];
        group
            .submit(Work { dir, frame })
            .map_err(|w| anyhow!("worker group {idx} is gone ({} frame)", w.dir))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coord
    }

    pub fn state(&self) -> Arc<NicState> {
        self.coord.state().load().value
    }

    pub fn stats(&self) -> Arc<MemStats> {
        Arc::clone(&self.stats)
    }

    /// Endpoints with wire RX turned on.
    pub fn wire_enabled(&self) -> BTreeSet<EndpointId> {
        self.wire.enabled()
    }

    /// Stop everything, letting each group finish its queued frames.
    pub fn shutdown(mut self) -> Vec<WorkerReport> {
        self.stop.store(true, Ordering::Release);
        if let Some(monitor) = self.monitor.take() {
            if monitor.join().is_err() {
                self.ectx.log.log(LogLevel::Error, "link monitor panicked");
            }
        }

        self.coord.shutdown();
        let mut reports = vec![];
        for group in self.groups.drain(..) {
            let id = group.id();
            match group.shutdown() {
                Some(r) => reports.push(r),
                None => self.ectx.log.log(
                    LogLevel::Error,
                    &format!("worker group {id} panicked"),
                ),
            }
        }
        reports
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Read every frame of an Ethernet capture.
pub fn read_capture(mut input: &[u8]) -> anyhow::Result<Vec<Vec<u8>>> {
    let (rest, hdr) = pcap::parse_pcap_header(input)
        .map_err(|e| anyhow!("bad capture header: {e:?}"))?;
    if hdr.network != Linktype::ETHERNET {
        bail!("unsupported link type {:?}", hdr.network);
    }
    input = rest;

    let mut frames = vec![];
    while !input.is_empty() {
        let (rest, block) = pcap::parse_pcap_frame(input)
            .map_err(|e| anyhow!("bad capture block {}: {e:?}", frames.len()))?;
        if block.caplen != block.origlen {
            bail!("frame {} is truncated", frames.len());
        }
        frames.push(block.data.to_vec());
        input = rest;
    }
    Ok(frames)
}

/// Write `frames` as an Ethernet capture, one second apart.
pub fn write_capture<'a>(
    out: &mut impl Write,
    frames: impl IntoIterator<Item = &'a [u8]>,
) -> anyhow::Result<()> {
    let mut hdr = PcapHeader {
        magic_number: 0xa1b2c3d4,
        version_major: 2,
        version_minor: 4,
        thiszone: 0,
        sigfigs: 0,
        snaplen: CAPTURE_SNAPLEN,
        network: Linktype::ETHERNET,
    };
    let bytes =
        hdr.to_vec().map_err(|e| anyhow!("encode capture header: {e:?}"))?;
    out.write_all(&bytes)?;

    for (ts, data) in frames.into_iter().enumerate() {
        let mut block = LegacyPcapBlock {
            ts_sec: ts as u32,
            ts_usec: 0,
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            data,
        };
        let bytes =
            block.to_vec().map_err(|e| anyhow!("encode frame {ts}: {e:?}"))?;
        out.write_all(&bytes)?;
    }
    Ok(())
}

/// One counter, flattened for JSON output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CounterRow {
    pub port: EndpointId,
    pub queue: u8,
    pub counter: String,
    pub value: u64,
}

pub fn counter_rows(counters: &BTreeMap<CounterKey, u64>) -> Vec<CounterRow> {
    let mut rows: Vec<_> = counters
        .iter()
        .map(|(k, v)| CounterRow {
            port: k.port,
            queue: k.queue,
            counter: k.kind.to_string(),
            value: *v,
        })
        .collect();
    rows.sort_by(|a, b| (a.port, a.queue).cmp(&(b.port, b.queue)));
    rows
}
