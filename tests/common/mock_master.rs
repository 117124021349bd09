// In-process master speaking enough of the metadata protocol for the client

use super::{read_frame, write_frame};
use moosefs_client::master::FileType;
use moosefs_client::protocol::status::{
    ERROR_BADPASSWORD, ERROR_EEXIST, ERROR_EINVAL, ERROR_ENOENT, ERROR_ENOTDIR, ERROR_ENOTEMPTY,
    STATUS_OK,
};
use moosefs_client::protocol::{
    nop_frame, pack, Unpacker, ANTOAN_GET_VERSION, ANTOAN_NOP, CLTOMA_FUSE_CREATE,
    CLTOMA_FUSE_GETATTR, CLTOMA_FUSE_LOOKUP, CLTOMA_FUSE_MKDIR, CLTOMA_FUSE_OPEN,
    CLTOMA_FUSE_QUOTACONTROL, CLTOMA_FUSE_READDIR, CLTOMA_FUSE_READ_CHUNK, CLTOMA_FUSE_REGISTER,
    CLTOMA_FUSE_RMDIR, CLTOMA_FUSE_STATFS, CLTOMA_FUSE_TRUNCATE, CLTOMA_FUSE_UNLINK,
    CLTOMA_FUSE_WRITE_CHUNK, CLTOMA_FUSE_WRITE_CHUNK_END, CLTOMA_QUOTA_INFO,
    FUSE_REGISTER_BLOB_ACL, MFS_ROOT_ID, REGISTER_CLOSESESSION, REGISTER_GETRANDOM,
    REGISTER_NEWSESSION, REGISTER_RECONNECT,
};
use moosefs_client::Version;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Version the mock reports, in wire form (patch shifted left by one).
pub const MOCK_MASTER_WIRE_VERSION: Version = Version::new(3, 0, 206);

const CHALLENGE: [u8; 32] = [7u8; 32];

#[derive(Debug, Clone)]
pub struct Node {
    pub file_type: FileType,
    pub mode: u16,
    pub length: u64,
    pub children: BTreeMap<String, u32>,
}

impl Node {
    fn new(file_type: FileType, mode: u16) -> Self {
        Self {
            file_type,
            mode,
            length: 0,
            children: BTreeMap::new(),
        }
    }

    fn encode_attr(&self) -> Vec<u8> {
        let wire_mode = (u16::from(self.file_type.to_wire()) << 12) | (self.mode & 0x0FFF);
        let mut buf = pack(&[
            &0u8,
            &wire_mode,
            &1000u32,
            &1000u32,
            &1_700_000_000u32,
            &1_700_000_000u32,
            &1_700_000_000u32,
            &1u32,
        ]);
        match self.file_type {
            FileType::BlockDevice | FileType::CharDevice => buf.extend(pack(&[&0u32])),
            FileType::Fifo | FileType::Socket => {}
            _ => buf.extend(pack(&[&self.length])),
        }
        buf
    }
}

/// Knobs for session handling and framing.
#[derive(Debug, Clone, Default)]
pub struct MasterBehavior {
    /// Required registration password.
    pub password: Option<String>,
    /// Treat reconnects as unknown sessions and hand out a new id.
    pub forget_sessions: bool,
    /// Send this many NOP frames before each reply.
    pub nops_before_reply: usize,
    /// Version reported instead of [`MOCK_MASTER_WIRE_VERSION`].
    pub version: Option<Version>,
}

/// A directory quota as stored by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockQuota {
    pub grace_period: u32,
    /// Soft then hard limits, exactly as received.
    pub limits: Vec<u8>,
}

/// Namespace and protocol history of the mock.
#[derive(Debug)]
pub struct MasterState {
    pub nodes: HashMap<u32, Node>,
    next_inode: u32,
    /// Chunk ids by inode and chunk index.
    pub chunks: HashMap<(u32, u32), u64>,
    next_chunk_id: u64,
    next_session: u32,
    pub sessions: Vec<u32>,
    pub closed_sessions: Vec<u32>,
    pub reconnects: usize,
    /// Every command received, in order, NOPs excluded.
    pub commands: Vec<u32>,
    /// `(chunk_id, length)` of every write-chunk-end.
    pub write_ends: Vec<(u64, u64)>,
    pub connections: usize,
    pub chunkservers: Vec<(Ipv4Addr, u16)>,
    pub quotas: HashMap<u32, MockQuota>,
}

impl MasterState {
    fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(MFS_ROOT_ID, Node::new(FileType::Directory, 0o755));
        Self {
            nodes,
            next_inode: 2,
            chunks: HashMap::new(),
            next_chunk_id: 0x100,
            next_session: 1,
            sessions: Vec::new(),
            closed_sessions: Vec::new(),
            reconnects: 0,
            commands: Vec::new(),
            write_ends: Vec::new(),
            connections: 0,
            chunkservers: Vec::new(),
            quotas: HashMap::new(),
        }
    }

    /// Count of `cmd` among received commands.
    pub fn count(&self, cmd: u32) -> usize {
        self.commands.iter().filter(|c| **c == cmd).count()
    }

    fn add_node(&mut self, parent: u32, name: &str, node: Node) -> std::result::Result<u32, u8> {
        let dir = self.nodes.get(&parent).ok_or(ERROR_ENOENT)?;
        if dir.file_type != FileType::Directory {
            return Err(ERROR_ENOTDIR);
        }
        if dir.children.contains_key(name) {
            return Err(ERROR_EEXIST);
        }
        let inode = self.next_inode;
        self.next_inode += 1;
        self.nodes.insert(inode, node);
        if let Some(dir) = self.nodes.get_mut(&parent) {
            dir.children.insert(name.to_string(), inode);
        }
        Ok(inode)
    }

    fn child(&self, parent: u32, name: &str) -> std::result::Result<u32, u8> {
        let dir = self.nodes.get(&parent).ok_or(ERROR_ENOENT)?;
        dir.children.get(name).copied().ok_or(ERROR_ENOENT)
    }

    fn new_session(&mut self) -> u32 {
        let id = self.next_session;
        self.next_session += 1;
        self.sessions.push(id);
        id
    }
}

pub struct MockMaster {
    addr: SocketAddr,
    state: Arc<Mutex<MasterState>>,
    behavior: Arc<Mutex<MasterBehavior>>,
    task: JoinHandle<()>,
}

impl MockMaster {
    pub async fn start() -> Self {
        Self::with_behavior(MasterBehavior::default()).await
    }

    pub async fn with_behavior(behavior: MasterBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MasterState::new()));
        let behavior = Arc::new(Mutex::new(behavior));

        let task = {
            let state = Arc::clone(&state);
            let behavior = Arc::clone(&behavior);
            tokio::spawn(async move {
                while let Ok((sock, _)) = listener.accept().await {
                    state.lock().connections += 1;
                    let state = Arc::clone(&state);
                    let behavior = Arc::clone(&behavior);
                    tokio::spawn(async move {
                        let _ = serve(sock, state, behavior).await;
                    });
                }
            })
        };

        Self {
            addr,
            state,
            behavior,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Point chunk locations at these chunkservers.
    pub fn add_chunkserver(&self, addr: SocketAddr) {
        self.state.lock().chunkservers.push((Ipv4Addr::LOCALHOST, addr.port()));
    }

    pub fn set_behavior(&self, behavior: MasterBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn state(&self) -> MutexGuard<'_, MasterState> {
        self.state.lock()
    }
}

impl Drop for MockMaster {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut sock: TcpStream,
    state: Arc<Mutex<MasterState>>,
    behavior: Arc<Mutex<MasterBehavior>>,
) -> std::io::Result<()> {
    while let Some((cmd, payload)) = read_frame(&mut sock).await? {
        if cmd == ANTOAN_NOP {
            continue;
        }
        let behavior = behavior.lock().clone();
        let reply = {
            let mut st = state.lock();
            st.commands.push(cmd);
            handle(&mut st, &behavior, cmd, &payload)
        };
        let Some(reply) = reply else {
            return Ok(());
        };
        for _ in 0..behavior.nops_before_reply {
            sock.write_all(&nop_frame()).await?;
        }
        write_frame(&mut sock, cmd + 1, &reply).await?;
    }
    Ok(())
}

fn status(code: u8) -> Vec<u8> {
    pack(&[&0u32, &code])
}

fn entry(st: &MasterState, inode: u32) -> Vec<u8> {
    let mut buf = pack(&[&0u32, &inode]);
    buf.extend(st.nodes[&inode].encode_attr());
    buf
}

fn attr(st: &MasterState, inode: u32) -> Vec<u8> {
    match st.nodes.get(&inode) {
        Some(node) => {
            let mut buf = pack(&[&0u32]);
            buf.extend(node.encode_attr());
            buf
        }
        None => status(ERROR_ENOENT),
    }
}

const QUOTA_ALL_FLAGS: u8 = 0xFF;
/// Soft and hard limits: inodes, length, size and real size each.
const QUOTA_LIMITS_LEN: usize = 2 * (4 + 3 * 8);

fn quota_record(quota: &MockQuota, used_inodes: u32) -> Vec<u8> {
    let mut buf = pack(&[&0u32, &QUOTA_ALL_FLAGS, &quota.grace_period]);
    buf.extend_from_slice(&quota.limits);
    buf.extend(pack(&[&used_inodes, &0u64, &0u64, &0u64]));
    buf
}

fn session_reply(session_id: u32) -> Vec<u8> {
    pack(&[
        &MOCK_MASTER_WIRE_VERSION,
        &session_id,
        &0x5EEDu64,
        &0u8,
        &0u32,
        &0u32,
        &999u32,
        &999u32,
        &1u8,
        &9u8,
        &0u32,
        &86400u32,
    ])
}

fn expected_password(password: &str) -> [u8; 16] {
    let digest = md5::compute(password.as_bytes());
    let mut ctx = md5::Context::new();
    ctx.consume(&CHALLENGE[..16]);
    ctx.consume(digest.0);
    ctx.consume(&CHALLENGE[16..]);
    ctx.compute().0
}

fn handle(st: &mut MasterState, behavior: &MasterBehavior, cmd: u32, payload: &[u8]) -> Option<Vec<u8>> {
    let mut u = Unpacker::new("mock_master", payload);
    let reply = match cmd {
        ANTOAN_GET_VERSION => pack(&[&behavior.version.unwrap_or(MOCK_MASTER_WIRE_VERSION)]),

        CLTOMA_FUSE_REGISTER => {
            let blob = u.bytes(FUSE_REGISTER_BLOB_ACL.len()).ok()?;
            if blob != FUSE_REGISTER_BLOB_ACL.as_bytes() {
                return None;
            }
            match u.u8().ok()? {
                REGISTER_GETRANDOM => CHALLENGE.to_vec(),
                REGISTER_NEWSESSION => {
                    let _version = u.u32().ok()?;
                    let label_len = u.i32().ok()? as usize;
                    u.skip(label_len).ok()?;
                    let subdir_len = u.i32().ok()? as usize;
                    u.skip(subdir_len).ok()?;
                    let digest = u.bytes(16).ok()?;
                    match &behavior.password {
                        Some(pw) if digest != expected_password(pw) => vec![ERROR_BADPASSWORD],
                        _ => session_reply(st.new_session()),
                    }
                }
                REGISTER_RECONNECT => {
                    let session_id = u.u32().ok()?;
                    st.reconnects += 1;
                    if behavior.forget_sessions || !st.sessions.contains(&session_id) {
                        session_reply(st.new_session())
                    } else {
                        vec![STATUS_OK]
                    }
                }
                REGISTER_CLOSESESSION => {
                    let session_id = u.u32().ok()?;
                    st.closed_sessions.push(session_id);
                    st.sessions.retain(|s| *s != session_id);
                    vec![STATUS_OK]
                }
                _ => return None,
            }
        }

        CLTOMA_FUSE_LOOKUP => {
            u.skip(4).ok()?;
            let parent = u.u32().ok()?;
            let len = u.u8().ok()? as usize;
            let name = u.string(len).ok()?;
            match st.child(parent, &name) {
                Ok(inode) => entry(st, inode),
                Err(code) => status(code),
            }
        }

        CLTOMA_FUSE_GETATTR | CLTOMA_FUSE_OPEN => {
            u.skip(4).ok()?;
            let inode = u.u32().ok()?;
            attr(st, inode)
        }

        CLTOMA_FUSE_CREATE | CLTOMA_FUSE_MKDIR => {
            u.skip(4).ok()?;
            let parent = u.u32().ok()?;
            let len = u.u8().ok()? as usize;
            let name = u.string(len).ok()?;
            let mode = u.u16().ok()?;
            let file_type = if cmd == CLTOMA_FUSE_MKDIR {
                FileType::Directory
            } else {
                FileType::File
            };
            match st.add_node(parent, &name, Node::new(file_type, mode)) {
                Ok(inode) => entry(st, inode),
                Err(code) => status(code),
            }
        }

        CLTOMA_FUSE_UNLINK | CLTOMA_FUSE_RMDIR => {
            u.skip(4).ok()?;
            let parent = u.u32().ok()?;
            let len = u.u8().ok()? as usize;
            let name = u.string(len).ok()?;
            match st.child(parent, &name) {
                Ok(inode) => {
                    let node = &st.nodes[&inode];
                    let code = match (cmd, node.file_type) {
                        (CLTOMA_FUSE_RMDIR, FileType::Directory) if !node.children.is_empty() => {
                            ERROR_ENOTEMPTY
                        }
                        (CLTOMA_FUSE_RMDIR, FileType::Directory) => STATUS_OK,
                        (CLTOMA_FUSE_RMDIR, _) => ERROR_ENOTDIR,
                        (_, FileType::Directory) => ERROR_EINVAL,
                        _ => STATUS_OK,
                    };
                    if code == STATUS_OK {
                        st.nodes.remove(&inode);
                        if let Some(dir) = st.nodes.get_mut(&parent) {
                            dir.children.remove(&name);
                        }
                    }
                    status(code)
                }
                Err(code) => status(code),
            }
        }

        CLTOMA_FUSE_READDIR => {
            u.skip(4).ok()?;
            let inode = u.u32().ok()?;
            u.skip(12).ok()?;
            let with_attrs = u.u8().ok()? != 0;
            let Some(dir) = st.nodes.get(&inode) else {
                return Some(status(ERROR_ENOENT));
            };
            let mut listing = vec![(".".to_string(), inode), ("..".to_string(), MFS_ROOT_ID)];
            listing.extend(dir.children.iter().map(|(n, i)| (n.clone(), *i)));

            let mut buf = pack(&[&0u32, &0u64]);
            for (name, child) in listing {
                let node = &st.nodes[&child];
                buf.extend(pack(&[&(name.len() as u8), &name, &child]));
                if with_attrs {
                    buf.extend(node.encode_attr());
                } else {
                    buf.push(node.file_type.to_wire());
                }
            }
            buf
        }

        CLTOMA_FUSE_READ_CHUNK | CLTOMA_FUSE_WRITE_CHUNK => {
            u.skip(4).ok()?;
            let inode = u.u32().ok()?;
            let index = u.u32().ok()?;
            let Some(node) = st.nodes.get(&inode) else {
                return Some(status(ERROR_ENOENT));
            };
            let length = node.length;
            let chunk_id = match st.chunks.get(&(inode, index)) {
                Some(id) => *id,
                None if cmd == CLTOMA_FUSE_WRITE_CHUNK => {
                    let id = st.next_chunk_id;
                    st.next_chunk_id += 1;
                    st.chunks.insert((inode, index), id);
                    id
                }
                None => 0,
            };

            let mut buf = pack(&[&0u32, &1u8, &length, &chunk_id, &1u32]);
            if chunk_id != 0 {
                for (ip, port) in &st.chunkservers {
                    buf.extend(pack(&[&u32::from(*ip), port, &Version::new(4, 0, 0)]));
                }
            }
            buf
        }

        CLTOMA_FUSE_WRITE_CHUNK_END => {
            u.skip(4).ok()?;
            let chunk_id = u.u64().ok()?;
            let inode = u.u32().ok()?;
            let _index = u.u32().ok()?;
            let length = u.u64().ok()?;
            st.write_ends.push((chunk_id, length));
            match st.nodes.get_mut(&inode) {
                Some(node) => {
                    node.length = length;
                    status(STATUS_OK)
                }
                None => status(ERROR_ENOENT),
            }
        }

        CLTOMA_FUSE_TRUNCATE => {
            u.skip(4).ok()?;
            let inode = u.u32().ok()?;
            u.skip(1 + 12).ok()?;
            let length = u.u64().ok()?;
            match st.nodes.get_mut(&inode) {
                Some(node) => {
                    node.length = length;
                    attr(st, inode)
                }
                None => status(ERROR_ENOENT),
            }
        }

        CLTOMA_FUSE_STATFS => pack(&[
            &0u32,
            &(10u64 << 40),
            &(4u64 << 40),
            &(1u64 << 30),
            &0u64,
            &(st.nodes.len() as u32),
        ]),

        CLTOMA_QUOTA_INFO => pack(&[&604800u32]),

        CLTOMA_FUSE_QUOTACONTROL => {
            u.skip(4).ok()?;
            let inode = u.u32().ok()?;
            let flags = u.u8().ok()?;
            let Some(node) = st.nodes.get(&inode) else {
                return Some(status(ERROR_ENOENT));
            };
            let used = node.children.len() as u32;

            if u.is_empty() {
                if flags == QUOTA_ALL_FLAGS {
                    st.quotas.remove(&inode);
                    status(STATUS_OK)
                } else {
                    match st.quotas.get(&inode) {
                        Some(quota) => quota_record(quota, used),
                        // No quota: a bare status, no record.
                        None => status(STATUS_OK),
                    }
                }
            } else {
                let grace_period = u.u32().ok()?;
                let limits = u.bytes(QUOTA_LIMITS_LEN).ok()?.to_vec();
                let quota = MockQuota {
                    grace_period,
                    limits,
                };
                let reply = quota_record(&quota, used);
                st.quotas.insert(inode, quota);
                reply
            }
        }

        _ => status(ERROR_EINVAL),
    };
    Some(reply)
}
