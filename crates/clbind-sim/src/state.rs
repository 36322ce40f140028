//! Object table of the simulated backend.
//!
//! Every native object lives in one table guarded by a single mutex. Handles
//! are never reused, so a released handle stays invalid for the lifetime of
//! the backend.

use std::collections::HashMap;

use clbind_core::memory::{MapFlags, MemFlags};
use clbind_core::native::{MemObjectType, RawHandle, RawImageFormat, ResourceKind};
use clbind_core::status::{self, Status};

pub(crate) type SimResult<T> = std::result::Result<T, Status>;

const FIRST_HANDLE: usize = 0x1000;
const HANDLE_STRIDE: usize = 0x10;

/// Build status codes as reported through build info queries.
pub(crate) mod build_code {
    pub const SUCCESS: i32 = 0;
    pub const NONE: i32 = -1;
    pub const ERROR: i32 = -2;
    pub const IN_PROGRESS: i32 = -3;
}

/// Event execution status codes.
pub(crate) mod exec_code {
    pub const COMPLETE: i32 = 0;
    pub const RUNNING: i32 = 1;
    pub const SUBMITTED: i32 = 2;
    pub const QUEUED: i32 = 3;
}

pub(crate) struct Object {
    pub kind: ResourceKind,
    pub refcount: u32,
    pub body: Body,
}

pub(crate) enum Body {
    Device(DeviceBody),
    Context(ContextBody),
    Queue(QueueBody),
    Program(ProgramBody),
    Kernel(KernelBody),
    Buffer(BufferBody),
    Image(ImageBody),
    Event(EventBody),
}

impl Body {
    fn kind(&self) -> ResourceKind {
        match self {
            Body::Device(_) => ResourceKind::Device,
            Body::Context(_) => ResourceKind::Context,
            Body::Queue(_) => ResourceKind::CommandQueue,
            Body::Program(_) => ResourceKind::Program,
            Body::Kernel(_) => ResourceKind::Kernel,
            Body::Buffer(_) | Body::Image(_) => ResourceKind::MemObject,
            Body::Event(_) => ResourceKind::Event,
        }
    }
}

pub(crate) struct DeviceBody {
    pub name: String,
}

pub(crate) struct ContextBody {
    pub devices: Vec<RawHandle>,
}

pub(crate) struct QueueBody {
    pub context: RawHandle,
    pub in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelSig {
    pub name: String,
    pub num_args: u32,
}

pub(crate) struct BuildRecord {
    pub status: i32,
    pub log: String,
    pub options: String,
    pub binary: Vec<u8>,
}

impl BuildRecord {
    pub fn new() -> Self {
        Self {
            status: build_code::NONE,
            log: String::new(),
            options: String::new(),
            binary: Vec::new(),
        }
    }
}

pub(crate) struct ProgramBody {
    pub context: RawHandle,
    pub devices: Vec<RawHandle>,
    /// Text reported as the program source; empty for binary programs.
    pub source: String,
    /// Text the compiler works on.
    pub code: String,
    /// One record per entry of `devices`.
    pub records: Vec<BuildRecord>,
    pub kernels: Vec<KernelSig>,
}

impl ProgramBody {
    pub fn record(&self, device: RawHandle) -> SimResult<&BuildRecord> {
        self.devices
            .iter()
            .position(|&d| d == device)
            .map(|index| &self.records[index])
            .ok_or(status::INVALID_DEVICE)
    }

    pub fn record_mut(&mut self, device: RawHandle) -> SimResult<&mut BuildRecord> {
        match self.devices.iter().position(|&d| d == device) {
            Some(index) => Ok(&mut self.records[index]),
            None => Err(status::INVALID_DEVICE),
        }
    }

    pub fn is_built(&self) -> bool {
        self.records.iter().any(|r| r.status == build_code::SUCCESS)
    }
}

pub(crate) struct KernelBody {
    pub program: RawHandle,
    pub sig: KernelSig,
}

pub(crate) struct BufferBody {
    pub context: RawHandle,
    pub flags: MemFlags,
    pub data: Vec<u8>,
}

/// A live host mapping of an image region.
pub(crate) struct MapRecord {
    pub staging: Box<[u8]>,
    pub origin: [usize; 3],
    pub region: [usize; 3],
    pub flags: MapFlags,
}

pub(crate) struct ImageBody {
    pub context: RawHandle,
    pub flags: MemFlags,
    pub format: RawImageFormat,
    pub image_type: MemObjectType,
    /// `[width, height, depth]`, depth 1 for 2D images.
    pub dims: [usize; 3],
    pub element_size: usize,
    /// Tightly packed pixel storage.
    pub data: Vec<u8>,
    pub parent: RawHandle,
    pub maps: HashMap<usize, MapRecord>,
}

impl ImageBody {
    pub fn row_pitch(&self) -> usize {
        self.dims[0] * self.element_size
    }

    pub fn slice_pitch(&self) -> usize {
        self.row_pitch() * self.dims[1]
    }

    /// Reject empty regions and regions extending past the image.
    pub fn check_region(&self, origin: &[usize; 3], region: &[usize; 3]) -> SimResult<()> {
        if region.iter().any(|&extent| extent == 0) {
            return Err(status::INVALID_VALUE);
        }
        for axis in 0..3 {
            match origin[axis].checked_add(region[axis]) {
                Some(end) if end <= self.dims[axis] => {}
                _ => return Err(status::INVALID_VALUE),
            }
        }
        Ok(())
    }

    /// Copy a region out of storage into `dst`, laid out at the given pitches.
    pub fn read_region(&self, origin: &[usize; 3], region: &[usize; 3], row_pitch: usize, slice_pitch: usize, dst: &mut [u8]) {
        let line = region[0] * self.element_size;
        for z in 0..region[2] {
            for y in 0..region[1] {
                let from = self.offset(origin[0], origin[1] + y, origin[2] + z);
                let to = z * slice_pitch + y * row_pitch;
                dst[to..to + line].copy_from_slice(&self.data[from..from + line]);
            }
        }
    }

    /// Copy `src`, laid out at the given pitches, into a region of storage.
    pub fn write_region(&mut self, origin: &[usize; 3], region: &[usize; 3], row_pitch: usize, slice_pitch: usize, src: &[u8]) {
        let line = region[0] * self.element_size;
        for z in 0..region[2] {
            for y in 0..region[1] {
                let to = self.offset(origin[0], origin[1] + y, origin[2] + z);
                let from = z * slice_pitch + y * row_pitch;
                self.data[to..to + line].copy_from_slice(&src[from..from + line]);
            }
        }
    }

    /// Tightly packed size of a region.
    pub fn packed_len(&self, region: &[usize; 3]) -> usize {
        region[0] * region[1] * region[2] * self.element_size
    }

    fn offset(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.slice_pitch() + y * self.row_pitch() + x * self.element_size
    }
}

pub(crate) struct EventBody {
    pub queue: RawHandle,
    pub context: RawHandle,
    pub status: i32,
    pub user: bool,
}

impl EventBody {
    pub fn is_terminal(&self) -> bool {
        self.status <= exec_code::COMPLETE
    }
}

macro_rules! accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($body:ty), $kind:expr;)+) => {
        $(
            #[allow(dead_code)]
            pub fn $get(&self, handle: RawHandle) -> SimResult<&$body> {
                match self.objects.get(&handle).map(|o| &o.body) {
                    Some(Body::$variant(body)) => Ok(body),
                    _ => Err($kind.invalid_status()),
                }
            }

            #[allow(dead_code)]
            pub fn $get_mut(&mut self, handle: RawHandle) -> SimResult<&mut $body> {
                match self.objects.get_mut(&handle).map(|o| &mut o.body) {
                    Some(Body::$variant(body)) => Ok(body),
                    _ => Err($kind.invalid_status()),
                }
            }
        )+
    };
}

/// Everything the backend knows, behind one lock.
pub(crate) struct State {
    next: usize,
    objects: HashMap<RawHandle, Object>,
    /// Host-issued release calls per handle, including rejected ones.
    pub release_calls: HashMap<RawHandle, usize>,
    /// Events in the order their commands reached a terminal state.
    pub completions: Vec<RawHandle>,
    /// Scripted build logs that force a device's builds to fail.
    pub build_failures: HashMap<RawHandle, String>,
    pub formats: Vec<RawImageFormat>,
}

impl State {
    pub fn new(formats: Vec<RawImageFormat>) -> Self {
        Self {
            next: FIRST_HANDLE,
            objects: HashMap::new(),
            release_calls: HashMap::new(),
            completions: Vec::new(),
            build_failures: HashMap::new(),
            formats,
        }
    }

    /// Store a new object with one reference.
    pub fn insert(&mut self, body: Body) -> RawHandle {
        let handle = RawHandle::from_raw(self.next);
        self.next += HANDLE_STRIDE;
        self.objects.insert(
            handle,
            Object {
                kind: body.kind(),
                refcount: 1,
                body,
            },
        );
        handle
    }

    pub fn object(&self, handle: RawHandle, kind: ResourceKind) -> SimResult<&Object> {
        match self.objects.get(&handle) {
            Some(object) if object.kind == kind => Ok(object),
            _ => Err(kind.invalid_status()),
        }
    }

    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn refcount(&self, handle: RawHandle) -> Option<u32> {
        self.objects.get(&handle).map(|o| o.refcount)
    }

    pub fn retain(&mut self, handle: RawHandle, kind: ResourceKind) -> Status {
        match self.objects.get_mut(&handle) {
            Some(object) if object.kind == kind => {
                object.refcount += 1;
                status::SUCCESS
            }
            _ => kind.invalid_status(),
        }
    }

    /// Drop one reference, destroying the object at zero.
    pub fn release(&mut self, handle: RawHandle, kind: ResourceKind) -> Status {
        let remaining = match self.objects.get_mut(&handle) {
            Some(object) if object.kind == kind => {
                object.refcount -= 1;
                object.refcount
            }
            _ => return kind.invalid_status(),
        };
        if remaining == 0 {
            self.destroy(handle);
        }
        status::SUCCESS
    }

    fn destroy(&mut self, handle: RawHandle) {
        let Some(object) = self.objects.remove(&handle) else {
            return;
        };
        tracing::trace!(%handle, kind = %object.kind, "Destroyed simulated object");
        match object.body {
            Body::Image(image) if !image.parent.is_null() => {
                self.release(image.parent, ResourceKind::MemObject);
            }
            Body::Kernel(kernel) => {
                self.release(kernel.program, ResourceKind::Program);
            }
            _ => {}
        }
    }

    pub fn context_of_mem(&self, handle: RawHandle) -> SimResult<RawHandle> {
        match self.objects.get(&handle).map(|o| &o.body) {
            Some(Body::Buffer(buffer)) => Ok(buffer.context),
            Some(Body::Image(image)) => Ok(image.context),
            _ => Err(status::INVALID_MEM_OBJECT),
        }
    }

    accessors! {
        device, device_mut => Device(DeviceBody), ResourceKind::Device;
        context, context_mut => Context(ContextBody), ResourceKind::Context;
        queue, queue_mut => Queue(QueueBody), ResourceKind::CommandQueue;
        program, program_mut => Program(ProgramBody), ResourceKind::Program;
        kernel, kernel_mut => Kernel(KernelBody), ResourceKind::Kernel;
        buffer, buffer_mut => Buffer(BufferBody), ResourceKind::MemObject;
        image, image_mut => Image(ImageBody), ResourceKind::MemObject;
        event, event_mut => Event(EventBody), ResourceKind::Event;
    }
}
