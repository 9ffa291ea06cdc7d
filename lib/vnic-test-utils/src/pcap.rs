// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Routines for building and reading packet capture files.

use pcap_parser::Linktype;
use pcap_parser::ToVec;
use pcap_parser::pcap;
use pcap_parser::pcap::LegacyPcapBlock;
use pcap_parser::pcap::PcapHeader;
use std::fs::File;
use std::io::Write;

/// Build a packet capture from a series of frames.
pub struct PcapBuilder<W: Write> {
    out: W,
    ts: u32,
}

impl PcapBuilder<File> {
    /// Create a new pcap builder, writing all captures to `path`.
    pub fn create(path: &str) -> Self {
        Self::new(File::create(path).unwrap())
    }
}

impl<W: Write> PcapBuilder<W> {
    pub fn new(mut out: W) -> Self {
        let mut hdr = PcapHeader {
            magic_number: 0xa1b2c3d4,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen: 9216,
            network: Linktype::ETHERNET,
        };

        out.write_all(&hdr.to_vec().unwrap()).unwrap();
        Self { out, ts: 0 }
    }

    /// Add a frame to the capture.
    pub fn add_frame(&mut self, bytes: &[u8]) {
        let mut block = LegacyPcapBlock {
            ts_sec: self.ts,
            ts_usec: 0,
            caplen: bytes.len() as u32,
            origlen: bytes.len() as u32,
            data: bytes,
        };
        self.ts += 1;

        self.out.write_all(&block.to_vec().unwrap()).unwrap();
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Read back every frame of a capture.
pub fn read_frames(mut input: &[u8]) -> Vec<Vec<u8>> {
    let (rest, _hdr) = match pcap::parse_pcap_header(input) {
        Ok(v) => v,
        Err(e) => panic!("failed to get header: {e:?}"),
    };
    input = rest;

    let mut frames = vec![];
    while !input.is_empty() {
        match pcap::parse_pcap_frame(input) {
            Ok((rest, block)) => {
                // We always want access to the entire packet.
                assert_eq!(block.origlen, block.caplen);
                frames.push(block.data.to_vec());
                input = rest;
            }

            Err(e) => panic!("failed to get next block: {e:?}"),
        }
    }
    frames
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn capture_reads_back() {
        let mut b = PcapBuilder::new(Vec::new());
        b.add_frame(&[1, 2, 3]);
        b.add_frame(&[4; 60]);
        let frames = read_frames(&b.into_inner());
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4; 60]]);
    }
}
