//! The stack machine that executes the intermediate code (spec §4.6), and
//! the parallel substrate that spawns sibling instances of it (spec §4.7).
//!
//! Activation-record bookkeeping (static link, dynamic link, saved return
//! address) lives in [`Frame`], a `Vec` the machine keeps alongside the
//! data store `S`, rather than laid out inline in `S` itself — see
//! `store.rs`'s module doc for why. Level-relative addressing (`Variable L
//! d`, `ReferenceParameter L d`) walks `Frame::static_link` `L` times from
//! the current frame, exactly mirroring the source's own nesting (spec §9
//! "Static-link chain vs display").

use crate::channel::ChannelRegistry;
use crate::error::{NodeError, RuntimeError};
use crate::io::{IntSink, IntSource};
use crate::opcode::Opcode;
use crate::random::SplitMix64;
use crate::store::{Storage, StorageMut, Store};
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Default size of the bounded data store `S` (spec §3 "a data store `S` of
/// bounded size"). Generous enough for the recursive/array-heavy sample
/// programs in spec §8 without becoming a de facto unbounded heap.
pub const DEFAULT_STORE_SIZE: usize = 1 << 16;

/// One activation record (spec §3 "Activation record at runtime"), minus
/// the declared-object slots themselves (those live in `S`, addressed via
/// `base`).
#[derive(Clone, Copy, Debug)]
struct Frame {
    /// Index into the owning machine's frame stack: the lexically
    /// enclosing frame, found once at call time by walking `L` static
    /// links from the caller (spec §4.6 "ProcedureInvocation").
    static_link: usize,
    /// Index into the frame stack: the frame to resume into on return.
    dynamic_link: usize,
    return_address: usize,
    /// `S` address of this frame's displacement 0 (spec §4.3 "the return
    /// parameter occupies displacement 0").
    base: usize,
    /// Words the caller pushed before the call (return slot, if any, plus
    /// value/reference arguments) — recorded from the callee's two-word
    /// entry header (see `compiler::assembler`'s `reserve_procedure_entry`)
    /// so `EndProcedureBlock`'s `k` operand only needs to carry the
    /// *parameter* byte count, not the return-slot flag too (spec §9 open
    /// question on `EndProcedureBlock`'s operand).
    param_words: i32,
}

/// State shared by every node spawned off one root program: the read-only
/// code image, the channel registry, the PRNG's program-wide seed, a
/// monotonic spawn-order counter feeding it (spec §9 "Randomize
/// determinism"), and the join handles of every spawned node so the root
/// can wait for all of them at program exit (spec §4.7 "Termination").
struct Shared {
    code: Vec<i32>,
    channels: ChannelRegistry,
    program_seed: u64,
    next_spawn_order: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<Result<(), NodeError>>>>,
    store_size: usize,
}

pub type SharedSource = Arc<Mutex<dyn IntSource + Send>>;
pub type SharedSink = Arc<Mutex<dyn IntSink + Send>>;

pub struct Machine {
    shared: Arc<Shared>,
    store: Store,
    frames: Vec<Frame>,
    /// Number of frames that sit below this node's own call: 0 for the root
    /// node (whose lone `root_frame` is never popped), or the length of the
    /// copied static ancestor chain for a spawned node. `EndProcedureBlock`
    /// popping the frame stack back down to exactly this floor means the
    /// node's one call has returned, so the node is done (spec §4.7
    /// "Termination") — there is no caller continuation to jump back into.
    call_depth_floor: usize,
    block_starts: Vec<usize>,
    t: usize,
    p: usize,
    random: SplitMix64,
    input: SharedSource,
    output: SharedSink,
    node_id: usize,
}

impl Machine {
    /// Builds the root node (node 0) for a freshly loaded code image.
    pub fn new(code: Vec<i32>, program_seed: u64, input: SharedSource, output: SharedSink) -> Machine {
        Machine::with_store_size(code, program_seed, input, output, DEFAULT_STORE_SIZE)
    }

    pub fn with_store_size(
        code: Vec<i32>,
        program_seed: u64,
        input: SharedSource,
        output: SharedSink,
        store_size: usize,
    ) -> Machine {
        let shared = Arc::new(Shared {
            code,
            channels: ChannelRegistry::new(),
            program_seed,
            next_spawn_order: AtomicUsize::new(1),
            handles: Mutex::new(Vec::new()),
            store_size,
        });
        Machine::root(shared, input, output)
    }

    fn root(shared: Arc<Shared>, input: SharedSource, output: SharedSink) -> Machine {
        let root_frame = Frame { static_link: 0, dynamic_link: 0, return_address: shared.code.len(), base: 0, param_words: 0 };
        Machine {
            store: Store::new(shared.store_size),
            frames: vec![root_frame],
            call_depth_floor: 0,
            block_starts: Vec::new(),
            t: 0,
            p: 0,
            random: SplitMix64::new(shared.program_seed, 0),
            input,
            output,
            node_id: 0,
            shared,
        }
    }

    fn err(&self, error: RuntimeError) -> NodeError {
        NodeError { node: self.node_id, error }
    }

    fn code(&self) -> &[i32] {
        &self.shared.code
    }

    fn opcode_at(&self, address: usize) -> Result<Opcode, NodeError> {
        let raw = *self.code().get(address).ok_or_else(|| self.err(RuntimeError::InvalidAddress))?;
        Opcode::from_i32(raw).ok_or_else(|| self.err(RuntimeError::InvalidAddress))
    }

    fn operand(&self, index: usize) -> i32 {
        self.code()[self.p + 1 + index]
    }

    fn push(&mut self, value: i32) -> Result<(), NodeError> {
        self.store.write(self.t, value).map_err(|_| self.err(RuntimeError::InvalidAddress))?;
        self.t += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<i32, NodeError> {
        if self.t == 0 {
            return Err(self.err(RuntimeError::InvalidAddress));
        }
        self.t -= 1;
        self.store.read(self.t).map_err(|_| self.err(RuntimeError::InvalidAddress))
    }

    fn read(&self, address: usize) -> Result<i32, NodeError> {
        self.store.read(address).map_err(|_| self.err(RuntimeError::InvalidAddress))
    }

    fn write(&mut self, address: usize, value: i32) -> Result<(), NodeError> {
        self.store.write(address, value).map_err(|_| self.err(RuntimeError::InvalidAddress))
    }

    /// Walks `levels_up` static links outward from the current frame (spec
    /// §9 "walks static links at execution time").
    fn frame_base_at_level(&self, levels_up: i32) -> usize {
        let mut index = self.frames.len() - 1;
        for _ in 0..levels_up {
            index = self.frames[index].static_link;
        }
        self.frames[index].base
    }

    /// Runs until `EndProgram`, a fatal [`RuntimeError`], or cancellation by
    /// a sibling node (spec §4.7 "Cancellation"). A fatal error here cancels
    /// every other node the same way a spawned child's error does in
    /// `spawn`'s thread closure — the root is a node too, and siblings
    /// blocked on a channel must be asked to stop regardless of which node
    /// raised the error (spec §4.7 "A runtime error in any node terminates
    /// the entire program; sibling nodes are asked to stop").
    pub fn run(&mut self) -> Result<(), NodeError> {
        loop {
            if self.shared.channels.is_cancelled() {
                return Err(self.err(RuntimeError::Cancelled));
            }
            match self.step() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    self.shared.channels.cancel_all();
                    return Err(e);
                }
            }
        }
    }

    /// For the root node only: after its own `EndProgram`, block until
    /// every spawned node has finished (spec §4.7 "Termination").
    pub fn join_spawned_nodes(&self) -> Result<(), NodeError> {
        loop {
            let handle = self.shared.handles.lock().unwrap().pop();
            let handle = match handle {
                Some(h) => h,
                None => return Ok(()),
            };
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return Err(self.err(RuntimeError::Cancelled)),
            }
        }
    }

    /// Executes one instruction. Returns `Ok(true)` on `EndProgram`.
    fn step(&mut self) -> Result<bool, NodeError> {
        let opcode = self.opcode_at(self.p)?;
        match opcode {
            Opcode::Program => {
                self.t = self.operand(0) as usize;
                self.p += 2;
            }
            Opcode::EndProgram => return Ok(true),
            Opcode::ProcedureBlock => {
                self.t += self.operand(0) as usize;
                self.p += 2;
            }
            Opcode::EndProcedureBlock => {
                let k = self.operand(0);
                let frame = self.frames.pop().expect("EndProcedureBlock without a call");
                self.t = frame.base + (frame.param_words - k).max(0) as usize;
                if self.frames.len() == self.call_depth_floor {
                    // The one call this node exists to run has just
                    // returned. `frame.return_address` is meaningless here
                    // — it names a point in the *spawning* node's code, not
                    // this one's — so stop instead of jumping to it.
                    return Ok(true);
                }
                self.p = frame.return_address;
            }
            Opcode::ProcedureInvocation | Opcode::Parallel => {
                let level = self.operand(0);
                let header = self.operand(1) as usize;
                let next_p = self.p + 3;
                if opcode == Opcode::Parallel {
                    self.spawn(level, header, next_p)?;
                    self.p = next_p;
                } else {
                    self.invoke(level, header, next_p)?;
                }
            }
            Opcode::Block => {
                self.block_starts.push(self.t);
                self.t += self.operand(0) as usize;
                self.p += 2;
            }
            Opcode::EndBlock => {
                self.t = self.block_starts.pop().expect("EndBlock without a Block");
                self.p += 1;
            }
            Opcode::Variable => {
                let level = self.operand(0);
                let displacement = self.operand(1);
                let address = self.frame_base_at_level(level) as i32 + displacement;
                self.push(address)?;
                self.p += 3;
            }
            Opcode::ReferenceParameter => {
                let level = self.operand(0);
                let displacement = self.operand(1);
                let slot = self.frame_base_at_level(level) as i32 + displacement;
                let address = self.read(slot as usize)?;
                self.push(address)?;
                self.p += 3;
            }
            Opcode::Index => {
                let upper_bound = self.operand(0);
                let index = self.pop()?;
                let base = self.pop()?;
                if index < 1 || index > upper_bound {
                    return Err(self.err(RuntimeError::IndexOutOfBounds { index, upper_bound }));
                }
                self.push(base + (index - 1))?;
                self.p += 2;
            }
            Opcode::Constant => {
                let value = self.operand(0);
                self.push(value)?;
                self.p += 2;
            }
            Opcode::Value => {
                let address = self.pop()?;
                let value = self.read(address as usize)?;
                self.push(value)?;
                self.p += 1;
            }
            Opcode::Do => {
                let target = self.operand(0);
                let condition = self.pop()?;
                if condition == 0 {
                    self.p = target as usize;
                } else {
                    self.p += 2;
                }
            }
            Opcode::Goto => {
                self.p = self.operand(0) as usize;
            }
            Opcode::Assign => {
                let n = self.operand(0) as usize;
                let mut values = Vec::with_capacity(n);
                for _ in 0..n {
                    values.push(self.pop()?);
                }
                values.reverse();
                let mut addresses = Vec::with_capacity(n);
                for _ in 0..n {
                    addresses.push(self.pop()?);
                }
                addresses.reverse();
                for i in 0..n {
                    self.write(addresses[i] as usize, values[i])?;
                }
                self.p += 2;
            }
            Opcode::ReadInteger => {
                let address = self.pop()?;
                let value = self.input.lock().unwrap().read_integer().map_err(|e| self.err(e))?;
                self.write(address as usize, value)?;
                self.p += 1;
            }
            Opcode::ReadBoolean => {
                let address = self.pop()?;
                let value = self.input.lock().unwrap().read_boolean().map_err(|e| self.err(e))?;
                self.write(address as usize, value as i32)?;
                self.p += 1;
            }
            Opcode::WriteInteger => {
                let value = self.pop()?;
                self.output.lock().unwrap().write_integer(value);
                self.p += 1;
            }
            Opcode::WriteBoolean => {
                let value = self.pop()?;
                self.output.lock().unwrap().write_boolean(value != 0);
                self.p += 1;
            }
            Opcode::Minus => {
                let value = self.pop()?;
                self.push(value.wrapping_neg())?;
                self.p += 1;
            }
            Opcode::Add => self.binary_arith(i32::wrapping_add)?,
            Opcode::Subtract => self.binary_arith(i32::wrapping_sub)?,
            Opcode::Multiply => self.binary_arith(i32::wrapping_mul)?,
            Opcode::Divide => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                if rhs == 0 {
                    return Err(self.err(RuntimeError::DivisionByZero));
                }
                self.push(lhs.wrapping_div(rhs))?;
                self.p += 1;
            }
            Opcode::Modulo => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                if rhs == 0 {
                    return Err(self.err(RuntimeError::DivisionByZero));
                }
                self.push(lhs.wrapping_rem(rhs))?;
                self.p += 1;
            }
            Opcode::Power => {
                let exponent = self.pop()?;
                let base = self.pop()?;
                if exponent < 0 {
                    return Err(self.err(RuntimeError::NegativeExponent));
                }
                self.push(base.wrapping_pow(exponent as u32))?;
                self.p += 1;
            }
            Opcode::Less => self.binary_compare(|a, b| a < b)?,
            Opcode::LessOrEqual => self.binary_compare(|a, b| a <= b)?,
            Opcode::Equal => self.binary_compare(|a, b| a == b)?,
            Opcode::NotEqual => self.binary_compare(|a, b| a != b)?,
            Opcode::Greater => self.binary_compare(|a, b| a > b)?,
            Opcode::GreaterOrEqual => self.binary_compare(|a, b| a >= b)?,
            Opcode::And => self.binary_compare(|a, b| a != 0 && b != 0)?,
            Opcode::Or => self.binary_compare(|a, b| a != 0 || b != 0)?,
            Opcode::Not => {
                let value = self.pop()?;
                self.push((value == 0) as i32)?;
                self.p += 1;
            }
            Opcode::Randomize => {
                let address = self.pop()?;
                let value = self.random.next_non_negative_i32();
                self.write(address as usize, value)?;
                self.p += 1;
            }
            Opcode::Open => {
                let address = self.pop()?;
                let handle = self.shared.channels.open();
                self.write(address as usize, handle)?;
                self.p += 1;
            }
            Opcode::Send => {
                let handle = self.pop()?;
                let value = self.pop()?;
                self.shared.channels.send(handle, value).map_err(|e| self.err(e))?;
                self.p += 1;
            }
            Opcode::Receive => {
                let address = self.pop()?;
                let handle = self.pop()?;
                let value = self.shared.channels.receive(handle).map_err(|e| self.err(e))?;
                self.write(address as usize, value)?;
                self.p += 1;
            }
        }
        Ok(false)
    }

    fn binary_arith(&mut self, op: fn(i32, i32) -> i32) -> Result<(), NodeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(op(lhs, rhs))?;
        self.p += 1;
        Ok(())
    }

    fn binary_compare(&mut self, op: fn(i32, i32) -> bool) -> Result<(), NodeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(op(lhs, rhs) as i32)?;
        self.p += 1;
        Ok(())
    }

    /// Shared setup for `ProcedureInvocation` and `Parallel` (spec §9
    /// "differing only in the final opcode"): reads the callee's two-word
    /// entry header at `header` — `[param_words, body_start]` — and
    /// computes the new frame's `base` from the current top of stack minus
    /// `param_words`, since the caller has already pushed the (optional)
    /// return slot and every argument contiguously.
    fn new_frame(&self, level: i32, header: usize, return_address: usize) -> Frame {
        let static_link = {
            let mut index = self.frames.len() - 1;
            for _ in 0..level {
                index = self.frames[index].static_link;
            }
            index
        };
        let param_words = self.code()[header];
        let base = self.t - param_words as usize;
        Frame { static_link, dynamic_link: self.frames.len() - 1, return_address, base, param_words }
    }

    /// Copies the static ancestor chain ending at frame index `top` (spec
    /// §9 "Static-link chain vs display") into a self-contained `Vec`,
    /// renumbering every `static_link` to its new position. A spawned
    /// node's frame stack holds only this copy, not the spawning node's
    /// whole (unrelated) dynamic call stack — `static_link` is an index
    /// into *this machine's own* `frames`, so handing a child a frame whose
    /// `static_link` pointed into the parent's `frames` would be either
    /// meaningless or, worse, a valid-looking index into the wrong stack.
    fn static_chain(&self, top: usize) -> Vec<Frame> {
        let mut old_indices = Vec::new();
        let mut index = top;
        loop {
            old_indices.push(index);
            let next = self.frames[index].static_link;
            if next == index {
                break;
            }
            index = next;
        }
        old_indices.reverse();
        old_indices
            .iter()
            .map(|&old_index| {
                let mut frame = self.frames[old_index];
                let old_static = self.frames[old_index].static_link;
                frame.static_link = old_indices.iter().position(|&i| i == old_static).unwrap_or(0);
                frame
            })
            .collect()
    }

    fn invoke(&mut self, level: i32, header: usize, return_address: usize) -> Result<(), NodeError> {
        let frame = self.new_frame(level, header, return_address);
        let body_start = self.code()[header + 1] as usize;
        self.frames.push(frame);
        self.p = body_start;
        Ok(())
    }

    /// Snapshots the prepared frame and spawns a node to run it, sharing
    /// the code image and channel registry but nothing else (spec §4.7
    /// "independent data stacks"). The spawning node's own `P` continues
    /// past the `Parallel` instruction; it never executes the callee.
    ///
    /// A spawned node gets its own fresh store, not a view onto the
    /// caller's, so everything currently live — every frame on the static
    /// chain the callee's body can address, not just its own argument
    /// words — is copied across at the same addresses before the child
    /// starts. It's a one-time snapshot, not a shared memory region:
    /// subsequent writes in either node are invisible to the other, only
    /// channels cross the boundary (spec §4.7 "no shared variables except
    /// through channels"). Reference parameters and return values are
    /// rejected for `parallel` calls at compile time, since a snapshot
    /// can't stand in for a live cross-node address.
    fn spawn(&mut self, level: i32, header: usize, return_address: usize) -> Result<(), NodeError> {
        let mut frame = self.new_frame(level, header, return_address);
        let body_start = self.code()[header + 1] as usize;
        let snapshot = self.store.snapshot(self.t);

        // The child gets its own frame stack: a self-contained copy of the
        // static ancestor chain the callee's body can see (for access to
        // enclosing-scope names), with the new call's frame appended on
        // top. `call_depth_floor` records how many of those are ancestors
        // rather than the live call, so `EndProcedureBlock` knows when
        // *this* node's one call has returned.
        let mut child_frames = self.static_chain(frame.static_link);
        frame.static_link = child_frames.len() - 1;
        let call_depth_floor = child_frames.len();
        child_frames.push(frame);

        self.shared.channels.nodes().node_started();
        let spawn_order = self.shared.next_spawn_order.fetch_add(1, Ordering::SeqCst) as u64;
        let node_id = spawn_order as usize;

        let shared = Arc::clone(&self.shared);
        let input = Arc::clone(&self.input);
        let output = Arc::clone(&self.output);

        let handle = std::thread::spawn(move || -> Result<(), NodeError> {
            let mut store = Store::new(shared.store_size);
            store.restore(&snapshot);
            let mut child = Machine {
                store,
                frames: child_frames,
                call_depth_floor,
                block_starts: Vec::new(),
                t: frame.base + frame.param_words as usize,
                p: body_start,
                random: SplitMix64::new(shared.program_seed, spawn_order),
                input,
                output,
                node_id,
                shared: Arc::clone(&shared),
            };
            let result = child.run();
            shared.channels.nodes().node_finished();
            if result.is_err() {
                shared.channels.cancel_all();
            }
            result
        });

        self.shared.handles.lock().unwrap().push(handle);

        // This node never runs the callee, so nothing will later reset T
        // the way `EndProcedureBlock` would; roll it back past the
        // arguments the spawned node took its own copy of, leaving T
        // exactly where it stood before the `Parallel` instruction's
        // operands were pushed. A parallel call has no return value for
        // the spawning node to keep (spec §4.5 "Parallel").
        self.t -= frame.param_words as usize;
        Ok(())
    }
}
