// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::mem::size_of;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::OnceLock;

use log::debug;
use log::warn;

use crate::egl_defines::*;
use crate::features::GLES_MAX_VERSION_3_0;
use crate::features::NATIVE_SYNC_V2;
use crate::features::NATIVE_SYNC_V3;
use crate::features::NATIVE_SYNC_V4;
use crate::features::REFCOUNT_PIPE;
use crate::guest_utils::GfxstreamError;
use crate::guest_utils::GfxstreamResult;
use crate::ipc::*;

/// Thread handle reported for every sync the stub creates.
const STUB_SYNC_THREAD: u64 = 0x5707;

/// What the stub renderer advertises and how it behaves.
#[derive(Clone, Debug)]
pub struct StubConfig {
    pub renderer_version: u32,
    /// Host extension tokens returned by `rcGetHostExtensionsString`.
    pub extensions: Vec<String>,
    pub egl_version: (EGLint, EGLint),
    pub egl_vendor: String,
    pub egl_extensions: String,
    pub gl_vendor: String,
    pub gl_renderer: String,
    pub gl_version: String,
    pub display_width: u32,
    pub display_height: u32,
    /// Column ids of the config table.
    pub config_attribs: Vec<EGLint>,
    /// One row of values per config, in `config_attribs` order.
    pub configs: Vec<Vec<EGLint>>,
    /// Answers to `glGetIntegerv`. Unlisted names read as zero.
    pub gl_limits: Vec<(GLenum, i32)>,
    /// Offer a refcount side channel on every transport.
    pub refcount_channel: bool,
    /// Syncs are signaled as soon as they are created.
    pub signal_syncs: bool,
}

impl StubConfig {
    /// The default configuration without any native sync extension.
    pub fn without_native_sync() -> StubConfig {
        let mut config = StubConfig::default();
        config
            .extensions
            .retain(|e| !e.starts_with("ANDROID_EMU_native_sync"));
        config
    }

    fn config_row(&self, config_id: u32) -> Option<&Vec<EGLint>> {
        let column = self.config_attribs.iter().position(|a| *a == EGL_CONFIG_ID)?;
        self.configs
            .iter()
            .find(|row| row.get(column) == Some(&(config_id as EGLint)))
    }
}

impl Default for StubConfig {
    fn default() -> Self {
        let es_all = EGL_OPENGL_ES_BIT | EGL_OPENGL_ES2_BIT | EGL_OPENGL_ES3_BIT_KHR;
        StubConfig {
            renderer_version: 1,
            extensions: [
                NATIVE_SYNC_V2,
                NATIVE_SYNC_V3,
                NATIVE_SYNC_V4,
                GLES_MAX_VERSION_3_0,
                REFCOUNT_PIPE,
                "ANDROID_EMU_CHECKSUM_HELPER_v1",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            egl_version: (1, 4),
            egl_vendor: "Stub".to_string(),
            egl_extensions: "EGL_KHR_image_base EGL_KHR_surfaceless_context EGL_EXT_host_only"
                .to_string(),
            gl_vendor: "Stub".to_string(),
            gl_renderer: "gfxstream stub renderer".to_string(),
            gl_version: "OpenGL ES 3.0 stub".to_string(),
            display_width: 1280,
            display_height: 720,
            config_attribs: vec![
                EGL_CONFIG_ID,
                EGL_SURFACE_TYPE,
                EGL_RENDERABLE_TYPE,
                EGL_RED_SIZE,
                EGL_GREEN_SIZE,
                EGL_BLUE_SIZE,
                EGL_ALPHA_SIZE,
                EGL_DEPTH_SIZE,
            ],
            configs: vec![
                vec![1, EGL_WINDOW_BIT | EGL_PBUFFER_BIT, es_all, 8, 8, 8, 8, 24],
                vec![2, EGL_WINDOW_BIT | EGL_PBUFFER_BIT, es_all, 5, 6, 5, 0, 16],
                vec![3, EGL_PBUFFER_BIT, EGL_OPENGL_ES2_BIT, 8, 8, 8, 0, 0],
            ],
            gl_limits: vec![
                (GL_MAX_VERTEX_ATTRIBS, 16),
                (GL_MAX_TRANSFORM_FEEDBACK_SEPARATE_ATTRIBS, 4),
                (GL_MAX_UNIFORM_BUFFER_BINDINGS, 24),
                (GL_MAX_ATOMIC_COUNTER_BUFFER_BINDINGS, 1),
                (GL_MAX_SHADER_STORAGE_BUFFER_BINDINGS, 4),
                (GL_MAX_VERTEX_ATTRIB_BINDINGS, 16),
            ],
            refcount_channel: true,
            signal_syncs: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubContext {
    pub config: u32,
    pub share: u32,
    pub gl_version: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubSurface {
    pub config: u32,
    pub width: u32,
    pub height: u32,
    pub color_buffer: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StubColorBuffer {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub refs: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StubSync {
    signaled: bool,
    destroy_when_signaled: bool,
}

/// Everything the stub host knows, shared by all of its transports.
pub struct StubState {
    config: StubConfig,
    disconnected: bool,
    saw_client_flags: bool,
    opcode_counts: BTreeMap<u32, usize>,
    next_handle: u32,
    next_sync: u64,
    next_client: u32,
    contexts: BTreeMap<u32, StubContext>,
    surfaces: BTreeMap<u32, StubSurface>,
    color_buffers: BTreeMap<u32, StubColorBuffer>,
    syncs: BTreeMap<u64, StubSync>,
    /// (context, draw, read) current on each client.
    current: BTreeMap<u32, (u32, u32, u32)>,
    posted: Vec<u32>,
    swap_interval: EGLint,
    fail_create_context: bool,
    fail_create_surface: bool,
    fail_make_current: bool,
    fail_packet: Option<u32>,
}

impl StubState {
    fn new(config: StubConfig) -> StubState {
        StubState {
            config,
            disconnected: false,
            saw_client_flags: false,
            opcode_counts: BTreeMap::new(),
            next_handle: 1,
            next_sync: 1,
            next_client: 1,
            contexts: BTreeMap::new(),
            surfaces: BTreeMap::new(),
            color_buffers: BTreeMap::new(),
            syncs: BTreeMap::new(),
            current: BTreeMap::new(),
            posted: Vec::new(),
            swap_interval: 1,
            fail_create_context: false,
            fail_create_surface: false,
            fail_make_current: false,
            fail_packet: None,
        }
    }

    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    /// Number of packets with `opcode` received so far, over all transports.
    pub fn opcode_count(&self, opcode: u32) -> usize {
        self.opcode_counts.get(&opcode).copied().unwrap_or(0)
    }

    pub fn saw_client_flags(&self) -> bool {
        self.saw_client_flags
    }

    /// Breaks every transport: reads and writes fail from now on.
    pub fn disconnect(&mut self) {
        self.disconnected = true;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn contexts(&self) -> &BTreeMap<u32, StubContext> {
        &self.contexts
    }

    pub fn surfaces(&self) -> &BTreeMap<u32, StubSurface> {
        &self.surfaces
    }

    pub fn color_buffers(&self) -> &BTreeMap<u32, StubColorBuffer> {
        &self.color_buffers
    }

    pub fn live_syncs(&self) -> usize {
        self.syncs.len()
    }

    /// Marks every pending sync as signaled, releasing those the guest handed over to the host.
    pub fn signal_all_syncs(&mut self) {
        for sync in self.syncs.values_mut() {
            sync.signaled = true;
        }
        self.syncs.retain(|_, sync| !sync.destroy_when_signaled);
    }

    /// Context current on the connection numbered `client`, 0 if none.
    pub fn current_context(&self, client: u32) -> u32 {
        self.current.get(&client).map(|c| c.0).unwrap_or(0)
    }

    /// Color buffers passed to `rcFBPost`, in order.
    pub fn posted(&self) -> &[u32] {
        &self.posted
    }

    pub fn swap_interval(&self) -> EGLint {
        self.swap_interval
    }

    pub fn set_fail_create_context(&mut self, fail: bool) {
        self.fail_create_context = fail;
    }

    pub fn set_fail_create_surface(&mut self, fail: bool) {
        self.fail_create_surface = fail;
    }

    pub fn set_fail_make_current(&mut self, fail: bool) {
        self.fail_make_current = fail;
    }

    /// Breaks the transport that sends the next packet with `opcode`. Other transports are unaffected.
    pub fn fail_next_packet(&mut self, opcode: u32) {
        self.fail_packet = Some(opcode);
    }

    fn allocate_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    /// Allocates a color buffer the way a guest allocator would, holding one reference.
    pub fn allocate_color_buffer(&mut self, width: u32, height: u32, format: u32) -> u32 {
        let handle = self.allocate_handle();
        self.color_buffers.insert(
            handle,
            StubColorBuffer {
                width,
                height,
                format,
                refs: 1,
            },
        );
        handle
    }

    /// Drops one reference to `handle`, freeing it on the last one.
    pub fn release_color_buffer(&mut self, handle: u32) {
        match self.color_buffers.get_mut(&handle) {
            Some(buffer) if buffer.refs > 1 => buffer.refs -= 1,
            Some(_) => {
                self.color_buffers.remove(&handle);
            }
            None => warn!("stub: release of unknown color buffer {}", handle),
        }
    }

    fn string_for(&self, opcode: u32, name: u32) -> Option<String> {
        match opcode {
            RC_GET_HOST_EXTENSIONS_STRING => Some(self.config.extensions.join(" ")),
            RC_QUERY_EGL_STRING => match name as EGLint {
                EGL_VENDOR => Some(self.config.egl_vendor.clone()),
                EGL_VERSION => Some(format!(
                    "{}.{}",
                    self.config.egl_version.0, self.config.egl_version.1
                )),
                EGL_EXTENSIONS => Some(self.config.egl_extensions.clone()),
                _ => None,
            },
            _ => match name {
                GL_VENDOR => Some(self.config.gl_vendor.clone()),
                GL_RENDERER => Some(self.config.gl_renderer.clone()),
                GL_VERSION => Some(self.config.gl_version.clone()),
                GL_EXTENSIONS => Some(String::new()),
                _ => None,
            },
        }
    }

    fn config_matches(&self, row: &[EGLint], request: &[EGLint]) -> bool {
        request
            .chunks_exact(2)
            .take_while(|pair| pair[0] != EGL_NONE)
            .all(|pair| {
                let (attrib, wanted) = (pair[0], pair[1]);
                let column = match self.config.config_attribs.iter().position(|a| *a == attrib) {
                    Some(column) => column,
                    None => return true,
                };
                let have = row[column];
                match attrib {
                    _ if wanted == EGL_DONT_CARE => true,
                    EGL_CONFIG_ID => have == wanted,
                    EGL_SURFACE_TYPE | EGL_RENDERABLE_TYPE => have & wanted == wanted,
                    _ => have >= wanted,
                }
            })
    }
}

/// Cursor over the arguments of one decoded packet.
struct Args<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Args<'a> {
    fn bytes(&mut self, len: usize) -> GfxstreamResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(GfxstreamError::ProtocolViolation("packet shorter than its arguments"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self) -> GfxstreamResult<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn i32(&mut self) -> GfxstreamResult<i32> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> GfxstreamResult<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn buffer(&mut self) -> GfxstreamResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    fn out_len(&mut self) -> GfxstreamResult<usize> {
        Ok(self.u32()? as usize)
    }

    fn ints(&mut self) -> GfxstreamResult<Vec<EGLint>> {
        Ok(self
            .buffer()?
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Reply under construction: output buffers first, then the return value.
#[derive(Default)]
struct ReplyBuilder(Vec<u8>);

impl ReplyBuilder {
    fn u32(mut self, value: u32) -> ReplyBuilder {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn i32(mut self, value: i32) -> ReplyBuilder {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u64(mut self, value: u64) -> ReplyBuilder {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes `data` into an output buffer of exactly `len` bytes.
    fn out(mut self, data: &[u8], len: usize) -> ReplyBuilder {
        let copied = data.len().min(len);
        self.0.extend_from_slice(&data[..copied]);
        self.0.resize(self.0.len() + len - copied, 0);
        self
    }
}

/// An in-process host renderer that decodes the render-control protocol and keeps just enough
/// state to answer it consistently.
#[derive(Clone)]
pub struct StubRenderer {
    state: Arc<Mutex<StubState>>,
}

impl StubRenderer {
    pub fn new(config: StubConfig) -> StubRenderer {
        StubRenderer {
            state: Arc::new(Mutex::new(StubState::new(config))),
        }
    }

    /// The renderer behind every `TransportKind::Stub` connection of the process.
    pub fn shared() -> StubRenderer {
        static SHARED: OnceLock<StubRenderer> = OnceLock::new();
        SHARED
            .get_or_init(|| StubRenderer::new(Default::default()))
            .clone()
    }

    pub fn state(&self) -> MutexGuard<'_, StubState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a new client connection.
    pub fn transport(&self) -> StubTransport {
        let client = {
            let mut state = self.state();
            let client = state.next_client;
            state.next_client += 1;
            client
        };
        StubTransport {
            renderer: self.clone(),
            client,
            flags_read: false,
            checksum: ChecksumCalculator::new(),
            inbox: Vec::new(),
            outbox: VecDeque::new(),
        }
    }
}

/// One client's connection to a `StubRenderer`. Requests are decoded as soon as a full packet has
/// been written.
pub struct StubTransport {
    renderer: StubRenderer,
    client: u32,
    flags_read: bool,
    checksum: ChecksumCalculator,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
}

fn disconnected() -> GfxstreamError {
    IoError::from(ErrorKind::BrokenPipe).into()
}

impl StubTransport {
    /// Number the renderer gave this connection.
    pub fn client(&self) -> u32 {
        self.client
    }

    /// Drains every reply byte produced so far, for servers that forward them to a socket.
    pub fn take_replies(&mut self) -> Vec<u8> {
        self.outbox.drain(..).collect()
    }

    fn process(&mut self) -> GfxstreamResult<()> {
        loop {
            if !self.flags_read {
                if self.inbox.len() < CLIENT_FLAGS_SIZE {
                    return Ok(());
                }
                self.inbox.drain(..CLIENT_FLAGS_SIZE);
                self.flags_read = true;
                self.renderer.state().saw_client_flags = true;
                continue;
            }

            let header_size = size_of::<RenderControlHeader>();
            if self.inbox.len() < header_size {
                return Ok(());
            }
            let size = u32::from_le_bytes([self.inbox[4], self.inbox[5], self.inbox[6], self.inbox[7]])
                as usize;
            if size < header_size + self.checksum.trailer_size() {
                return Err(GfxstreamError::ProtocolViolation("packet smaller than its header"));
            }
            if self.inbox.len() < size {
                return Ok(());
            }

            let packet: Vec<u8> = self.inbox.drain(..size).collect();
            self.handle_packet(&packet)?;
        }
    }

    fn handle_packet(&mut self, packet: &[u8]) -> GfxstreamResult<()> {
        let payload_len = packet.len() - self.checksum.trailer_size();
        self.checksum
            .validate_trailer(payload_len, &packet[payload_len..])?;

        let opcode = u32::from_le_bytes([packet[0], packet[1], packet[2], packet[3]]);
        let mut args = Args {
            data: &packet[size_of::<RenderControlHeader>()..payload_len],
            offset: 0,
        };

        let reply = {
            let mut state = self.renderer.state();
            if state.fail_packet == Some(opcode) {
                state.fail_packet = None;
                return Err(disconnected());
            }
            *state.opcode_counts.entry(opcode).or_insert(0) += 1;
            decode(&mut state, self.client, opcode, &mut args)?
        };

        if let Some(ReplyBuilder(mut data)) = reply {
            let len = data.len();
            self.checksum.add_trailer(&mut data, len)?;
            self.outbox.extend(data);
        }

        if opcode == RC_SELECT_CHECKSUM_HELPER {
            let mut args = Args {
                data: &packet[size_of::<RenderControlHeader>()..payload_len],
                offset: 0,
            };
            let version = args.u32()?;
            if !self.checksum.set_version(version) {
                return Err(GfxstreamError::ProtocolViolation("unknown checksum version"));
            }
            debug!("stub: client {} selected checksum v{}", self.client, version);
        }
        Ok(())
    }
}

impl Transport for StubTransport {
    fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()> {
        if self.renderer.state().disconnected {
            return Err(disconnected());
        }
        self.inbox.extend_from_slice(data);
        self.process()
    }

    fn flush(&mut self) -> GfxstreamResult<()> {
        if self.renderer.state().disconnected {
            return Err(disconnected());
        }
        Ok(())
    }

    fn read_exact(&mut self, data: &mut [u8]) -> GfxstreamResult<()> {
        if self.renderer.state().disconnected {
            return Err(disconnected());
        }
        let len = data.len();
        if self.outbox.len() < len {
            return Err(IoError::from(ErrorKind::UnexpectedEof).into());
        }
        for (dst, src) in data.iter_mut().zip(self.outbox.drain(..len)) {
            *dst = src;
        }
        Ok(())
    }

    fn open_refcount_channel(&self) -> GfxstreamResult<Option<Box<dyn Transport>>> {
        let state = self.renderer.state();
        if state.disconnected {
            return Err(disconnected());
        }
        if !state.config.refcount_channel {
            return Ok(None);
        }
        Ok(Some(Box::new(RefcountChannel {
            renderer: self.renderer.clone(),
            pending: Vec::new(),
            handle: None,
        })))
    }
}

impl Drop for StubTransport {
    fn drop(&mut self) {
        self.renderer.state().current.remove(&self.client);
    }
}

/// Side channel holding a color buffer: the reference taken at creation is dropped when the
/// channel closes.
struct RefcountChannel {
    renderer: StubRenderer,
    pending: Vec<u8>,
    handle: Option<u32>,
}

impl Transport for RefcountChannel {
    fn write_all(&mut self, data: &[u8]) -> GfxstreamResult<()> {
        self.pending.extend_from_slice(data);
        if self.handle.is_none() && self.pending.len() >= size_of::<u32>() {
            let raw: Vec<u8> = self.pending.drain(..size_of::<u32>()).collect();
            self.handle = Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
        }
        Ok(())
    }

    fn flush(&mut self) -> GfxstreamResult<()> {
        Ok(())
    }

    fn read_exact(&mut self, _data: &mut [u8]) -> GfxstreamResult<()> {
        Err(IoError::from(ErrorKind::UnexpectedEof).into())
    }
}

impl Drop for RefcountChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            self.renderer.state().release_color_buffer(handle);
        }
    }
}

/// Answers a string query the way the host does: the needed size negated when `len` is too small.
fn string_reply(value: &str, out_len: usize) -> GfxstreamResult<ReplyBuilder> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    let needed: i32 = bytes.len().try_into()?;
    let ret = match out_len < bytes.len() {
        true => -needed,
        false => needed,
    };
    Ok(ReplyBuilder::default().out(&bytes, out_len).i32(ret))
}

/// Decodes and executes one request. Returns the reply for requests that have one.
fn decode(state: &mut StubState, client: u32, opcode: u32, args: &mut Args) -> GfxstreamResult<Option<ReplyBuilder>> {
    let reply = match opcode {
        RC_GET_RENDERER_VERSION => ReplyBuilder::default().u32(state.config.renderer_version),
        RC_GET_EGL_VERSION => {
            let (major_len, minor_len) = (args.out_len()?, args.out_len()?);
            let (major, minor) = state.config.egl_version;
            ReplyBuilder::default()
                .out(&major.to_le_bytes(), major_len)
                .out(&minor.to_le_bytes(), minor_len)
                .i32(1)
        }
        RC_QUERY_EGL_STRING | RC_GET_GL_STRING => {
            let name = args.u32()?;
            let out_len = args.out_len()?;
            let _len = args.i32()?;
            match state.string_for(opcode, name) {
                Some(value) => string_reply(&value, out_len)?,
                None => ReplyBuilder::default().out(&[], out_len).i32(0),
            }
        }
        RC_GET_HOST_EXTENSIONS_STRING => {
            let _len = args.u32()?;
            let out_len = args.out_len()?;
            let value = state.string_for(opcode, 0).unwrap_or_default();
            string_reply(&value, out_len)?
        }
        RC_GET_NUM_CONFIGS => {
            let out_len = args.out_len()?;
            let num_attribs: u32 = state.config.config_attribs.len().try_into()?;
            let num_configs: i32 = state.config.configs.len().try_into()?;
            ReplyBuilder::default()
                .out(&num_attribs.to_le_bytes(), out_len)
                .i32(num_configs)
        }
        RC_GET_CONFIGS => {
            let _len = args.u32()?;
            let out_len = args.out_len()?;
            let words: Vec<u8> = std::iter::once(&state.config.config_attribs)
                .chain(state.config.configs.iter())
                .flatten()
                .flat_map(|w| w.to_le_bytes())
                .collect();
            let ret = match out_len < words.len() {
                true => -1,
                false => state.config.configs.len().try_into()?,
            };
            ReplyBuilder::default().out(&words, out_len).i32(ret)
        }
        RC_CHOOSE_CONFIG => {
            let request = args.ints()?;
            let _len = args.u32()?;
            let out_len = args.out_len()?;
            let max = args.u32()? as usize;
            let matches: Vec<u32> = state
                .config
                .configs
                .iter()
                .enumerate()
                .filter(|(_, row)| state.config_matches(row, &request))
                .map(|(index, _)| index as u32)
                .collect();
            let count = match max {
                0 => matches.len(),
                max => matches.len().min(max),
            };
            let indices: Vec<u8> = matches[..count].iter().flat_map(|i| i.to_le_bytes()).collect();
            ReplyBuilder::default()
                .out(&indices, out_len)
                .i32(count.try_into()?)
        }
        RC_GET_FB_PARAM => {
            let value = match args.i32()? {
                FB_WIDTH => state.config.display_width as i32,
                FB_HEIGHT => state.config.display_height as i32,
                FB_XDPI | FB_YDPI => 160,
                FB_FPS => 60,
                FB_MIN_SWAP_INTERVAL => 0,
                FB_MAX_SWAP_INTERVAL => 1,
                _ => 0,
            };
            ReplyBuilder::default().i32(value)
        }
        RC_CREATE_CONTEXT => {
            let (config, share, gl_version) = (args.u32()?, args.u32()?, args.u32()?);
            let valid = !state.fail_create_context
                && state.config.config_row(config).is_some()
                && (share == 0 || state.contexts.contains_key(&share));
            let handle = match valid {
                true => {
                    let handle = state.allocate_handle();
                    state.contexts.insert(
                        handle,
                        StubContext {
                            config,
                            share,
                            gl_version,
                        },
                    );
                    handle
                }
                false => 0,
            };
            ReplyBuilder::default().u32(handle)
        }
        RC_DESTROY_CONTEXT => {
            let context = args.u32()?;
            if state.contexts.remove(&context).is_none() {
                warn!("stub: destroy of unknown context {}", context);
            }
            return Ok(None);
        }
        RC_CREATE_WINDOW_SURFACE => {
            let (config, width, height) = (args.u32()?, args.u32()?, args.u32()?);
            let handle = match !state.fail_create_surface && state.config.config_row(config).is_some() {
                true => {
                    let handle = state.allocate_handle();
                    state.surfaces.insert(
                        handle,
                        StubSurface {
                            config,
                            width,
                            height,
                            color_buffer: 0,
                        },
                    );
                    handle
                }
                false => 0,
            };
            ReplyBuilder::default().u32(handle)
        }
        RC_DESTROY_WINDOW_SURFACE => {
            let surface = args.u32()?;
            if state.surfaces.remove(&surface).is_none() {
                warn!("stub: destroy of unknown surface {}", surface);
            }
            return Ok(None);
        }
        RC_CREATE_COLOR_BUFFER => {
            let (width, height, format) = (args.u32()?, args.u32()?, args.u32()?);
            let handle = state.allocate_color_buffer(width, height, format);
            ReplyBuilder::default().u32(handle)
        }
        RC_OPEN_COLOR_BUFFER | RC_OPEN_COLOR_BUFFER2 => {
            let handle = args.u32()?;
            let ret = match state.color_buffers.get_mut(&handle) {
                Some(buffer) => {
                    buffer.refs += 1;
                    0
                }
                None => -1,
            };
            match opcode {
                RC_OPEN_COLOR_BUFFER => return Ok(None),
                _ => ReplyBuilder::default().i32(ret),
            }
        }
        RC_CLOSE_COLOR_BUFFER => {
            let handle = args.u32()?;
            state.release_color_buffer(handle);
            return Ok(None);
        }
        RC_SET_WINDOW_COLOR_BUFFER => {
            let (surface, color_buffer) = (args.u32()?, args.u32()?);
            let known = state.color_buffers.contains_key(&color_buffer);
            match state.surfaces.get_mut(&surface) {
                Some(surface) if known => surface.color_buffer = color_buffer,
                _ => warn!(
                    "stub: cannot attach color buffer {} to surface {}",
                    color_buffer, surface
                ),
            }
            return Ok(None);
        }
        RC_FLUSH_WINDOW_COLOR_BUFFER => {
            let surface = args.u32()?;
            let ret = match state.surfaces.contains_key(&surface) {
                true => 0,
                false => -1,
            };
            ReplyBuilder::default().i32(ret)
        }
        RC_FLUSH_WINDOW_COLOR_BUFFER_ASYNC => {
            args.u32()?;
            return Ok(None);
        }
        RC_MAKE_CURRENT => {
            let (context, draw, read) = (args.u32()?, args.u32()?, args.u32()?);
            let known = |handle: u32, table: &BTreeMap<u32, StubSurface>| {
                handle == 0 || table.contains_key(&handle)
            };
            let ok = !state.fail_make_current
                && (context == 0
                    || (state.contexts.contains_key(&context)
                        && known(draw, &state.surfaces)
                        && known(read, &state.surfaces)));
            if ok {
                match context {
                    0 => state.current.remove(&client),
                    _ => state.current.insert(client, (context, draw, read)),
                };
            }
            ReplyBuilder::default().i32(ok as i32)
        }
        RC_FB_POST => {
            let color_buffer = args.u32()?;
            state.posted.push(color_buffer);
            return Ok(None);
        }
        RC_FB_SET_SWAP_INTERVAL => {
            state.swap_interval = args.i32()?;
            return Ok(None);
        }
        RC_BIND_TEXTURE | RC_BIND_RENDERBUFFER => {
            let color_buffer = args.u32()?;
            let ok = state.current.contains_key(&client)
                && state.color_buffers.contains_key(&color_buffer);
            ReplyBuilder::default().i32(ok as i32)
        }
        RC_SELECT_CHECKSUM_HELPER => {
            // The version switch happens once the packet is fully handled.
            return Ok(None);
        }
        RC_CREATE_SYNC_KHR => {
            let _sync_type = args.i32()?;
            let _attribs = args.ints()?;
            let _len = args.u32()?;
            let destroy_when_signaled = args.i32()? != 0;
            let (sync_len, thread_len) = (args.out_len()?, args.out_len()?);
            let handle = state.next_sync;
            state.next_sync += 1;
            let signaled = state.config.signal_syncs;
            if !(signaled && destroy_when_signaled) {
                state.syncs.insert(
                    handle,
                    StubSync {
                        signaled,
                        destroy_when_signaled,
                    },
                );
            }
            ReplyBuilder::default()
                .out(&handle.to_le_bytes(), sync_len)
                .out(&STUB_SYNC_THREAD.to_le_bytes(), thread_len)
        }
        RC_CLIENT_WAIT_SYNC_KHR => {
            let (sync, _flags, timeout) = (args.u64()?, args.i32()?, args.u64()?);
            let ret = match state.syncs.get_mut(&sync) {
                Some(sync) if sync.signaled => EGL_CONDITION_SATISFIED_KHR,
                // Nothing else runs on the stub, so waiting forever means finishing the work now.
                Some(sync) if timeout == EGL_FOREVER_KHR => {
                    sync.signaled = true;
                    EGL_CONDITION_SATISFIED_KHR
                }
                Some(_) => EGL_TIMEOUT_EXPIRED_KHR,
                None => EGL_CONDITION_SATISFIED_KHR,
            };
            ReplyBuilder::default().i32(ret)
        }
        RC_WAIT_SYNC_KHR => {
            args.u64()?;
            args.i32()?;
            return Ok(None);
        }
        RC_DESTROY_SYNC_KHR => {
            let sync = args.u64()?;
            let ret = match state.syncs.remove(&sync) {
                Some(_) => EGL_TRUE as i32,
                None => EGL_FALSE as i32,
            };
            ReplyBuilder::default().i32(ret)
        }
        RC_IS_SYNC_SIGNALED => {
            let sync = args.u64()?;
            let signaled = state.syncs.get(&sync).map(|s| s.signaled).unwrap_or(true);
            ReplyBuilder::default().i32(signaled as i32)
        }
        RC_COMPOSE => {
            let _len = args.u32()?;
            args.buffer()?;
            ReplyBuilder::default().i32(0)
        }
        RC_GET_DISPLAY_POSE => {
            let display_id = args.u32()?;
            let lens = [args.out_len()?, args.out_len()?, args.out_len()?, args.out_len()?];
            let (width, height, ret) = match display_id {
                0 => (state.config.display_width, state.config.display_height, 0),
                _ => (0, 0, -1),
            };
            ReplyBuilder::default()
                .out(&0i32.to_le_bytes(), lens[0])
                .out(&0i32.to_le_bytes(), lens[1])
                .out(&width.to_le_bytes(), lens[2])
                .out(&height.to_le_bytes(), lens[3])
                .i32(ret)
        }
        GLES1_OP_GET_INTEGERV | GLES2_OP_GET_INTEGERV => {
            let pname = args.u32()?;
            let out_len = args.out_len()?;
            let value = state
                .config
                .gl_limits
                .iter()
                .find(|(name, _)| *name == pname)
                .map(|(_, value)| *value)
                .unwrap_or(0);
            ReplyBuilder::default().out(&value.to_le_bytes(), out_len)
        }
        GLES1_OP_FLUSH | GLES2_OP_FLUSH => return Ok(None),
        GLES1_OP_FINISH | GLES2_OP_FINISH => ReplyBuilder::default().u32(0),
        _ => {
            warn!("stub: unknown opcode {}", opcode);
            return Err(GfxstreamError::ProtocolViolation("unknown opcode"));
        }
    };
    Ok(Some(reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_reply_reports_needed_size() {
        let ReplyBuilder(data) = string_reply("abc", 0).unwrap();
        assert_eq!(data, (-4i32).to_le_bytes());

        let ReplyBuilder(data) = string_reply("abc", 4).unwrap();
        assert_eq!(&data[..4], b"abc\0");
        assert_eq!(&data[4..], 4i32.to_le_bytes());
    }

    #[test]
    fn choose_config_filters_by_bits_and_sizes() {
        let state = StubState::new(StubConfig::default());
        let config = &state.config;
        let window_alpha = [EGL_SURFACE_TYPE, EGL_WINDOW_BIT, EGL_ALPHA_SIZE, 8, EGL_NONE];
        let matching: Vec<usize> = config
            .configs
            .iter()
            .enumerate()
            .filter(|(_, row)| state.config_matches(row, &window_alpha))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(matching, vec![0]);

        let dont_care = [EGL_ALPHA_SIZE, EGL_DONT_CARE, EGL_NONE];
        assert!(config
            .configs
            .iter()
            .all(|row| state.config_matches(row, &dont_care)));
    }

    #[test]
    fn color_buffer_freed_on_last_release() {
        let mut state = StubState::new(StubConfig::default());
        let handle = state.allocate_color_buffer(4, 4, GL_RGBA);
        state.color_buffers.get_mut(&handle).unwrap().refs += 1;
        state.release_color_buffer(handle);
        assert!(state.color_buffers().contains_key(&handle));
        state.release_color_buffer(handle);
        assert!(!state.color_buffers().contains_key(&handle));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let renderer = StubRenderer::new(StubConfig::default());
        let mut transport = renderer.transport();
        transport.write_all(&0u32.to_le_bytes()).unwrap();
        let mut packet = 4242u32.to_le_bytes().to_vec();
        packet.extend_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            transport.write_all(&packet),
            Err(GfxstreamError::ProtocolViolation(_))
        ));
    }
}
