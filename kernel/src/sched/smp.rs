//! Symmetric multiprocessing (SMP) support: the per-CPU core table.
//!
//! Each online CPU owns one [`CpuInfo`], which in turn owns its own
//! [`Scheduler`] (MLFQ ready queues plus sleep queue). There is no separate
//! top-level ready-queue/run-queue structure; the scheduler is the queue.

#![allow(clippy::fn_to_numeric_cast, clippy::needless_return)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "alloc")]
use alloc::{string::String, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::scheduler::Scheduler;
use super::task::{Task, ThreadState};

/// CPU information and the scheduler it owns.
pub struct CpuInfo {
    id: AtomicU8,
    pub online: AtomicBool,
    pub idle: AtomicBool,
    pub load: AtomicU8,
    pub nr_running: AtomicU32,
    pub scheduler: Scheduler,
    #[cfg(feature = "alloc")]
    pub vendor: String,
    #[cfg(feature = "alloc")]
    pub model: String,
    pub features: CpuFeatures,
}

#[derive(Debug, Default)]
pub struct CpuFeatures {
    pub fpu: bool,
    pub simd: bool,
    pub virtualization: bool,
    pub security: bool,
    pub phys_addr_bits: u8,
    pub virt_addr_bits: u8,
}

impl CpuInfo {
    pub const fn new(id: u8) -> Self {
        Self {
            id: AtomicU8::new(id),
            online: AtomicBool::new(false),
            idle: AtomicBool::new(true),
            load: AtomicU8::new(0),
            nr_running: AtomicU32::new(0),
            scheduler: Scheduler::new(),
            #[cfg(feature = "alloc")]
            vendor: String::new(),
            #[cfg(feature = "alloc")]
            model: String::new(),
            features: CpuFeatures {
                fpu: false,
                simd: false,
                virtualization: false,
                security: false,
                phys_addr_bits: 0,
                virt_addr_bits: 0,
            },
        }
    }

    pub fn bring_online(&self) {
        self.online.store(true, Ordering::Release);
        self.idle.store(true, Ordering::Release);
    }

    pub fn bring_offline(&self) {
        self.online.store(false, Ordering::Release);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u8 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn update_load(&self) {
        let nr_running = self.nr_running.load(Ordering::Relaxed);
        let load = (nr_running * 100 / MAX_LOAD_FACTOR).min(100) as u8;
        self.load.store(load, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct CpuTopology {
    pub total_cpus: u8,
    pub online_cpus: AtomicU8,
    pub sockets: u8,
    pub cores_per_socket: u8,
    pub threads_per_core: u8,
    #[cfg(feature = "alloc")]
    pub numa_nodes: Vec<NumaNode>,
}

#[cfg(feature = "alloc")]
#[derive(Debug)]
pub struct NumaNode {
    pub id: u8,
    pub cpus: Vec<u8>,
    pub memory_ranges: Vec<(usize, usize)>,
    pub distances: Vec<u8>,
}

impl CpuTopology {
    pub fn new() -> Self {
        Self {
            total_cpus: 1,
            online_cpus: AtomicU8::new(1),
            sockets: 1,
            cores_per_socket: 1,
            threads_per_core: 1,
            #[cfg(feature = "alloc")]
            numa_nodes: Vec::new(),
        }
    }

    pub fn detect(&mut self) {
        #[cfg(target_arch = "x86_64")]
        self.detect_x86_64();
        #[cfg(target_arch = "aarch64")]
        self.detect_aarch64();
        #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
        self.detect_riscv();
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_x86_64(&mut self) {
        use core::arch::x86_64::__cpuid;
        unsafe {
            let cpuid = __cpuid(0x1);
            let logical_cpus = ((cpuid.ebx >> 16) & 0xFF) as u8;
            if max_cpuid() >= 0xB {
                let cpuid = __cpuid(0xB);
                self.threads_per_core = (cpuid.ebx & 0xFFFF) as u8;
                let cpuid = __cpuid(0xB);
                self.cores_per_socket = ((cpuid.ebx & 0xFFFF) / self.threads_per_core.max(1) as u32) as u8;
                self.total_cpus = logical_cpus;
                self.sockets = self.total_cpus / (self.cores_per_socket.max(1) * self.threads_per_core.max(1));
            } else {
                self.total_cpus = logical_cpus;
            }
        }
    }

    #[cfg(target_arch = "aarch64")]
    fn detect_aarch64(&mut self) {
        unsafe {
            let mpidr: u64;
            core::arch::asm!("mrs {}, MPIDR_EL1", out(reg) mpidr);
            let _ = mpidr;
            self.threads_per_core = 1;
            self.cores_per_socket = 4;
            self.sockets = 1;
            self.total_cpus = self.sockets * self.cores_per_socket * self.threads_per_core;
        }
    }

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    fn detect_riscv(&mut self) {
        self.total_cpus = 1;
        self.threads_per_core = 1;
        self.cores_per_socket = 1;
        self.sockets = 1;
    }
}

impl Default for CpuTopology {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduced from 256 for bootloader compatibility.
pub const MAX_CPUS: usize = 16;
const MAX_LOAD_FACTOR: u32 = 10;

static CORES: [CpuInfo; MAX_CPUS] = [const { CpuInfo::new(0) }; MAX_CPUS];
static ONLINE: [AtomicBool; MAX_CPUS] = [const { AtomicBool::new(false) }; MAX_CPUS];

static CPU_TOPOLOGY: spin::Mutex<CpuTopology> = spin::Mutex::new(CpuTopology {
    total_cpus: 1,
    online_cpus: AtomicU8::new(1),
    sockets: 1,
    cores_per_socket: 1,
    threads_per_core: 1,
    #[cfg(feature = "alloc")]
    numa_nodes: Vec::new(),
});

/// Bring up the boot-strap processor's core-table entry.
pub fn init() {
    init_cpu(0);
    #[cfg(target_arch = "x86_64")]
    println!("[SMP] BSP online (secondary AP bring-up deferred)");
    #[cfg(target_arch = "aarch64")]
    unsafe {
        crate::arch::aarch64::direct_uart::uart_write_str("[SMP] BSP online\n");
    }
}

/// Initialize the core-table slot for `cpu_id`.
pub fn init_cpu(cpu_id: u8) {
    if (cpu_id as usize) >= MAX_CPUS {
        return;
    }
    CORES[cpu_id as usize].id.store(cpu_id, Ordering::Relaxed);
    CORES[cpu_id as usize].bring_online();
    ONLINE[cpu_id as usize].store(true, Ordering::Release);
}

/// The core table entry for whichever CPU is executing this call.
pub fn this_core() -> &'static CpuInfo {
    core(current_cpu_id())
}

/// The core table entry for a specific CPU, regardless of online state.
pub fn core(cpu_id: u8) -> &'static CpuInfo {
    &CORES[(cpu_id as usize) % MAX_CPUS]
}

pub fn per_cpu(cpu_id: u8) -> Option<&'static CpuInfo> {
    if (cpu_id as usize) < MAX_CPUS && ONLINE[cpu_id as usize].load(Ordering::Acquire) {
        Some(&CORES[cpu_id as usize])
    } else {
        None
    }
}

pub fn current_cpu_id() -> u8 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        use core::arch::x86_64::__cpuid;
        let cpuid = __cpuid(0x1);
        ((cpuid.ebx >> 24) & 0xFF) as u8
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mpidr: u64;
        core::arch::asm!("mrs {}, MPIDR_EL1", out(reg) mpidr);
        (mpidr & 0xFF) as u8
    }
    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    unsafe {
        let hartid: usize;
        core::arch::asm!("csrr {}, mhartid", out(reg) hartid);
        hartid as u8
    }
}

pub fn send_ipi(target_cpu: u8, vector: u8) {
    #[cfg(target_arch = "x86_64")]
    {
        println!("[SMP] IPI to CPU {} vector {:#x}", target_cpu, vector);
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        const GICD_BASE: usize = 0x0800_0000;
        const GICD_SGIR: usize = GICD_BASE + 0xF00;
        let target_list = 1u32 << target_cpu;
        let sgi_id = (vector & 0xF) as u32;
        core::ptr::write_volatile(GICD_SGIR as *mut u32, (target_list << 16) | sgi_id);
    }
    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    unsafe {
        let hart_mask = 1u64 << target_cpu;
        core::arch::asm!(
            "ecall",
            in("a0") hart_mask,
            in("a1") 0u64,
            in("a7") 0x735049,
            in("a6") 0,
            lateout("a0") _,
            lateout("a1") _,
        );
        let _ = vector;
    }
    #[allow(unused_variables)]
    let _ = (target_cpu, vector);
}

pub fn cpu_up(cpu_id: u8) -> Result<(), &'static str> {
    if cpu_id as usize >= MAX_CPUS {
        return Err("Invalid CPU ID");
    }
    if per_cpu(cpu_id).is_some() {
        return Err("CPU already online");
    }
    init_cpu(cpu_id);
    #[cfg(target_arch = "x86_64")]
    {
        send_ipi(cpu_id, 0x00);
        send_ipi(cpu_id, 0x08);
    }
    #[cfg(not(target_arch = "x86_64"))]
    send_ipi(cpu_id, 0);
    Ok(())
}

pub fn cpu_down(cpu_id: u8) -> Result<(), &'static str> {
    if cpu_id == 0 {
        return Err("Cannot offline BSP");
    }
    let Some(info) = per_cpu(cpu_id) else {
        return Err("CPU not initialized");
    };
    info.bring_offline();
    ONLINE[cpu_id as usize].store(false, Ordering::Release);
    Ok(())
}

/// Hand a thread off from its current CPU to `to_cpu`, honoring affinity
/// and refusing to move a running thread.
pub fn migrate_task(task: core::ptr::NonNull<Task>, to_cpu: u8) -> Result<(), &'static str> {
    // SAFETY: caller holds a valid registered task pointer.
    let t = unsafe { task.as_ref() };
    if !t.can_run_on(to_cpu) {
        return Err("Task affinity prevents migration");
    }
    if t.state() == ThreadState::Running {
        return Err("Cannot migrate running task");
    }
    let Some(dest) = per_cpu(to_cpu) else {
        return Err("Destination CPU not initialized");
    };
    t.set_current_cpu(Some(to_cpu));
    dest.scheduler.admit(task);
    dest
        .nr_running
        .fetch_add(1, Ordering::Relaxed);
    dest.update_load();
    if dest.is_idle() {
        send_ipi(to_cpu, 0);
    }
    super::metrics::SCHEDULER_METRICS.record_migration();
    Ok(())
}

pub fn find_least_loaded_cpu() -> u8 {
    let mut min_load = 100;
    let mut best_cpu = 0;
    for cpu_id in 0..MAX_CPUS as u8 {
        if let Some(info) = per_cpu(cpu_id) {
            let load = info.load.load(Ordering::Relaxed);
            if load < min_load {
                min_load = load;
                best_cpu = cpu_id;
            }
        }
    }
    best_cpu
}

pub fn find_least_loaded_cpu_with_affinity(affinity_mask: u64) -> u8 {
    let mut best_cpu = 0;
    let mut min_load = 100;
    let mut found_any = false;
    for cpu_id in 0..64.min(MAX_CPUS as u8) {
        if (affinity_mask & (1u64 << cpu_id)) != 0 {
            if let Some(info) = per_cpu(cpu_id) {
                let load = info.load.load(Ordering::Relaxed);
                if load < min_load || !found_any {
                    min_load = load;
                    best_cpu = cpu_id;
                    found_any = true;
                }
            }
        }
    }
    if found_any {
        best_cpu
    } else {
        find_least_loaded_cpu()
    }
}

#[cfg(target_arch = "x86_64")]
fn max_cpuid() -> u32 {
    unsafe {
        use core::arch::x86_64::__cpuid;
        __cpuid(0).eax
    }
}

/// Mark `cpu_id`'s core as the target for IPI-driven preemption; used by
/// `scheduler::wake`/`tick` to decide whether a remote reschedule is needed.
pub fn request_resched(cpu_id: u8) {
    if let Some(info) = per_cpu(cpu_id) {
        if !info.is_idle() {
            send_ipi(cpu_id, 0xFE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_defaults_to_zero_with_no_cpus_online() {
        assert_eq!(find_least_loaded_cpu(), 0);
    }
}
