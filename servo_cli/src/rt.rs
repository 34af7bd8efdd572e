//! Real-time scheduling helpers (Linux SCHED_FIFO / affinity / mlockall; macOS mlockall).
//!
//! Every step is best effort: a failure is reported on stderr and the control
//! loop runs with normal scheduling.

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
/// Capacity of cpu_set_t in CPU indices (bits).
const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn mlockall_checked(flags: libc::c_int) -> std::io::Result<()> {
    // SAFETY: mlockall takes no pointers; flags are the documented MCL_* bits.
    let rc = unsafe { libc::mlockall(flags) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
    use libc::{MCL_CURRENT, MCL_FUTURE};
    match lock {
        RtLock::None => Ok(()),
        RtLock::Current => {
            mlockall_checked(MCL_CURRENT).map_err(|e| eyre::eyre!("mlockall(current) failed: {e}"))
        }
        RtLock::All => match mlockall_checked(MCL_CURRENT | MCL_FUTURE) {
            Ok(()) => Ok(()),
            // future pages can exceed RLIMIT_MEMLOCK; settle for what is resident
            Err(first) if matches!(first.raw_os_error(), Some(libc::EPERM | libc::ENOMEM)) => {
                mlockall_checked(MCL_CURRENT).map_err(|e| {
                    eyre::eyre!(
                        "mlockall(current|future) failed: {first}; fallback mlockall(current) also failed: {e}; \
                         hint: needs CAP_IPC_LOCK (or root) and a sufficient 'ulimit -l'"
                    )
                })
            }
            Err(e) => Err(eyre::eyre!("mlockall(current|future) failed: {e}")),
        },
    }
}

#[cfg(target_os = "linux")]
fn apply_fifo_priority(prio: Option<i32>) -> eyre::Result<i32> {
    use libc::{SCHED_FIFO, sched_get_priority_max, sched_get_priority_min, sched_param};

    // SAFETY: plain queries with a valid policy constant.
    let (min, max) = unsafe {
        let min = sched_get_priority_min(SCHED_FIFO);
        let max = sched_get_priority_max(SCHED_FIFO);
        if min < 0 || max < 0 { (1, 99) } else { (min, max) }
    };
    let prio_val = prio.unwrap_or(max).clamp(min, max);
    let param = sched_param {
        sched_priority: prio_val,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling process.
    let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        eyre::bail!(
            "sched_setscheduler(SCHED_FIFO, {prio_val}) failed: {err}; \
             hint: needs CAP_SYS_NICE or root (sudo setcap cap_sys_nice=ep /path/to/servo)"
        );
    }
    Ok(prio_val)
}

#[cfg(target_os = "linux")]
fn apply_affinity(rt_cpu: Option<usize>) -> eyre::Result<usize> {
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, cpu_set_t};

    let target = rt_cpu.unwrap_or(0);
    // SAFETY: sysconf has no memory-safety preconditions.
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online < 1 {
        eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
    }
    if target as libc::c_long >= online {
        eyre::bail!("requested CPU {target} >= online {online}");
    }
    if target >= MAX_CPUSET_BITS {
        eyre::bail!("requested CPU {target} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
    }

    // SAFETY: cpu_set_t is plain data; all-zero is a valid empty set, and the
    // sizes passed match the buffers.
    unsafe {
        let mut allowed: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut allowed);
        if libc::sched_getaffinity(0, std::mem::size_of::<cpu_set_t>(), &mut allowed) == 0
            && !CPU_ISSET(target, &allowed)
        {
            eyre::bail!("CPU {target} not permitted by current affinity mask");
        }
        let mut desired: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut desired);
        CPU_SET(target, &mut desired);
        if libc::sched_setaffinity(0, std::mem::size_of::<cpu_set_t>(), &desired) != 0 {
            return Err(eyre::eyre!(std::io::Error::last_os_error()));
        }
    }
    Ok(target)
}

/// Apply real-time settings once per process; later calls are no-ops.
#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, rt_cpu: Option<usize>) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        match apply_mem_lock(lock) {
            Ok(()) => eprintln!("RT: memory lock = {lock:?}"),
            Err(err) => eprintln!("Warning: {err}"),
        }
        match apply_fifo_priority(prio) {
            Ok(p) => eprintln!("RT: SCHED_FIFO priority {p}"),
            Err(err) => eprintln!("Warning: {err}"),
        }
        match apply_affinity(rt_cpu) {
            Ok(cpu) => eprintln!("RT: pinned to CPU {cpu}"),
            Err(err) => eprintln!("Warning: affinity not applied: {err}"),
        }
    });
}

#[cfg(target_os = "macos")]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, lock: RtLock, _rt_cpu: Option<usize>) {
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        match apply_mem_lock(lock) {
            Ok(()) => eprintln!("RT: memory lock = {lock:?}"),
            Err(err) => eprintln!("Warning: {err}"),
        }
        eprintln!("Warning: macOS does not support SCHED_FIFO or affinity; only mlockall applied.");
    });
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn setup_rt_once(rt: bool, _prio: Option<i32>, _lock: RtLock, _rt_cpu: Option<usize>) {
    if rt {
        eprintln!("Warning: real-time mode is not supported on this OS; continuing without it.");
    }
}
