// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Common test utilities for airscan-server tests

#![allow(dead_code)]

use airscan_discovery::{DeviceAdvertiser, DnsRecord};
use airscan_discovery_mock::{MockAdvertiser, MockBackend};
use airscan_server::{
    Capabilities, CertificateProvisioner, DeviceConfig, ScanJob, ScanJobFactory, ScanServer, ScanSettings,
    SecurityPolicy, ServerOptions, StatusCallback, StatusTransition,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Bytes of every page produced by [`FakeScanner`]
pub const PAGE: &[u8] = b"fake page bytes";

/// Scan engine that yields a fixed number of identical pages
#[derive(Default)]
pub struct FakeScanner {
    pub pages: usize,
    pub created: AtomicUsize,
}

impl FakeScanner {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            created: AtomicUsize::new(0),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanJobFactory for FakeScanner {
    async fn create_job(&self, _settings: &ScanSettings) -> anyhow::Result<Box<dyn ScanJob>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeJob {
            remaining: Mutex::new(self.pages),
            callback: Mutex::new(None),
        }))
    }
}

pub struct FakeJob {
    remaining: Mutex<usize>,
    callback: Mutex<Option<StatusCallback>>,
}

impl FakeJob {
    fn notify(&self, transition: StatusTransition) {
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(transition);
        }
    }
}

#[async_trait]
impl ScanJob for FakeJob {
    fn cancel(&self) {
        *self.remaining.lock() = 0;
        self.notify(StatusTransition::CancelJob);
        self.notify(StatusTransition::DeviceIdle);
    }

    async fn wait_for_next_document(&self) -> bool {
        let has_page = {
            let mut remaining = self.remaining.lock();
            if *remaining == 0 {
                false
            } else {
                *remaining -= 1;
                true
            }
        };
        if !has_page {
            self.notify(StatusTransition::DeviceIdle);
        }
        has_page
    }

    async fn write_document_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        out.write_all(PAGE).await
    }

    async fn write_progress_to(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        let remaining = *self.remaining.lock();
        out.write_all(format!("<Progress><Remaining>{remaining}</Remaining></Progress>").as_bytes())
            .await
    }

    fn register_status_transition(&self, callback: StatusCallback) {
        *self.callback.lock() = Some(callback);
    }
}

/// Scan engine whose jobs never deliver a page
#[derive(Default)]
pub struct StuckScanner;

#[async_trait]
impl ScanJobFactory for StuckScanner {
    async fn create_job(&self, _settings: &ScanSettings) -> anyhow::Result<Box<dyn ScanJob>> {
        Ok(Box::new(StuckJob))
    }
}

pub struct StuckJob;

#[async_trait]
impl ScanJob for StuckJob {
    fn cancel(&self) {}

    async fn wait_for_next_document(&self) -> bool {
        std::future::pending().await
    }

    async fn write_document_to(
        &self,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        Ok(())
    }

    async fn write_progress_to(
        &self,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<()> {
        Ok(())
    }

    fn register_status_transition(&self, _callback: StatusCallback) {}
}

/// Scan engine that panics when asked for a job
#[derive(Default)]
pub struct PanickingScanner;

#[async_trait]
impl ScanJobFactory for PanickingScanner {
    async fn create_job(&self, _settings: &ScanSettings) -> anyhow::Result<Box<dyn ScanJob>> {
        panic!("scanner driver crashed");
    }
}

/// Device with both ports left to the allocator
pub fn device(uuid: Uuid, make_and_model: &str, scanner: Arc<FakeScanner>) -> DeviceConfig {
    device_with(uuid, make_and_model, scanner)
}

/// Device backed by any scan engine
pub fn device_with(
    uuid: Uuid,
    make_and_model: &str,
    factory: Arc<dyn ScanJobFactory>,
) -> DeviceConfig {
    DeviceConfig::new(uuid, Capabilities::new(make_and_model), factory)
}

/// Server options bound to loopback
pub fn options(policy: SecurityPolicy) -> ServerOptions {
    ServerOptions {
        security_policy: policy,
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ..ServerOptions::default()
    }
}

/// Server publishing into an in-memory backend
pub struct TestServer {
    pub server: ScanServer,
    pub advertiser: Arc<MockAdvertiser>,
}

impl TestServer {
    pub fn new(options: ServerOptions) -> Self {
        Self::with_provisioner(options, CertificateProvisioner::new())
    }

    pub fn with_provisioner(options: ServerOptions, provisioner: CertificateProvisioner) -> Self {
        let advertiser = Arc::new(MockAdvertiser::new(MockBackend::new()));
        let dyn_advertiser: Arc<dyn DeviceAdvertiser> = advertiser.clone();
        Self {
            server: ScanServer::with_provisioner(options, dyn_advertiser, provisioner),
            advertiser,
        }
    }

    pub fn backend(&self) -> &MockBackend {
        self.advertiser.backend()
    }

    pub fn http_base(&self, uuid: Uuid) -> String {
        let (port, _) = self.server.device_ports(uuid).expect("device not registered");
        format!("http://127.0.0.1:{port}/eSCL")
    }

    pub fn https_base(&self, uuid: Uuid) -> String {
        let (_, port) = self.server.device_ports(uuid).expect("device not registered");
        format!("https://127.0.0.1:{port}/eSCL")
    }
}

/// HTTP client accepting the self-signed certificate, without connection reuse
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(0)
        .build()
        .expect("Failed to build HTTP client")
}

pub fn srv_ports(records: &[DnsRecord]) -> Vec<u16> {
    let mut ports: Vec<u16> = records
        .iter()
        .filter_map(|r| match r {
            DnsRecord::Srv { port, .. } => Some(*port),
            _ => None,
        })
        .collect();
    ports.sort_unstable();
    ports
}

pub const SCAN_SETTINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScanSettings xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03" xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm">
  <pwg:Version>2.63</pwg:Version>
  <pwg:InputSource>Platen</pwg:InputSource>
  <scan:ColorMode>RGB24</scan:ColorMode>
  <scan:DocumentFormatExt>image/jpeg</scan:DocumentFormatExt>
  <scan:XResolution>300</scan:XResolution>
  <scan:YResolution>300</scan:YResolution>
</scan:ScanSettings>"#;
