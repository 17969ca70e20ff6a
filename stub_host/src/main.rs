// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Read;
use std::io::Write;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;

use anyhow::Context;
use clap::Parser;
use gfxstream_guest::features::REFCOUNT_PIPE;
use gfxstream_guest::ipc::Transport;
use gfxstream_guest::stub::StubConfig;
use gfxstream_guest::stub::StubRenderer;
use gfxstream_guest::stub::StubTransport;
use log::info;
use log::warn;

const READ_CHUNK_SIZE: usize = 16384;

#[derive(Parser, Debug)]
#[command(version, about = None, long_about = None)]
struct Args {
    /// Path of the socket guests connect to with a `unix` transport.
    #[arg(long, default_value = "/tmp/gfxstream-stub-0")]
    socket_path: PathBuf,

    /// Renderer version reported to guests.
    #[arg(long, default_value_t = 1)]
    renderer_version: u32,

    /// Leave the native sync extensions out of the host extension string.
    #[arg(long)]
    no_native_sync: bool,

    #[arg(long, default_value_t = 1280)]
    display_width: u32,

    #[arg(long, default_value_t = 720)]
    display_height: u32,
}

/// Pumps requests from `stream` into the renderer and replies back until the guest hangs up.
fn serve(mut stream: UnixStream, mut transport: StubTransport) -> anyhow::Result<()> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let len = stream.read(&mut buf)?;
        if len == 0 {
            return Ok(());
        }

        transport.write_all(&buf[..len])?;
        let replies = transport.take_replies();
        if !replies.is_empty() {
            stream.write_all(&replies)?;
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match args.no_native_sync {
        true => StubConfig::without_native_sync(),
        false => StubConfig::default(),
    };
    config.renderer_version = args.renderer_version;
    config.display_width = args.display_width;
    config.display_height = args.display_height;
    // Side channels need a second stream per client, which a socket guest can't open.
    config.refcount_channel = false;
    config.extensions.retain(|e| e != REFCOUNT_PIPE);
    let renderer = StubRenderer::new(config);

    // Remove path if it exists
    let _ = std::fs::remove_file(&args.socket_path);
    let listener = UnixListener::bind(&args.socket_path)
        .with_context(|| format!("failed to bind {}", args.socket_path.display()))?;
    info!("stub renderer listening on {}", args.socket_path.display());

    for stream in listener.incoming() {
        let stream = stream.context("failed to accept guest connection")?;
        let transport = renderer.transport();
        let client = transport.client();
        thread::Builder::new()
            .name(format!("stub_client_{}", client))
            .spawn(move || match serve(stream, transport) {
                Ok(()) => info!("client {} disconnected", client),
                Err(e) => warn!("client {} failed: {:#}", client, e),
            })?;
    }

    Ok(())
}
