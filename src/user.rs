//! User-space programs: the authenticating root process and the shell.
//! Everything here talks to the kernel exclusively through syscalls.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crate::devices::keyboard::KEYBOARD_IOCTL_DISABLE_ECHO;
use crate::devices::DEV_ID_KEYBOARD;
use crate::pcb::{DEFAULT_STACK_SIZE, MS_PER_CLOCK_TICK};
use crate::signal::KILL_SIGNAL_NUM;
use crate::syscall::{
    syscreate, sysgetcputimes, sysgetpid, sysioctl, syskill, sysopen, sysputs, sysread,
    syssighandler, syssleep, syswait, ProcessStatuses, sysclose,
};

const VALID_USER: &str = "cs415";
const VALID_PASS: &str = "EveryonegetsanA";

const LINE_LEN: usize = 80;

/// Detailed state names for `ps`, indexed by the status snapshot encoding.
static DETAILED_STATES: [&str; 9] = [
    "READY",
    "STOPPED",
    "RUNNING",
    "BLOCKED: NONE",
    "BLOCKED: SENDING",
    "BLOCKED: RECEIVING",
    "BLOCKED: WAITING",
    "BLOCKED: SLEEPING",
    "BLOCKED: DEVICE IO",
];

/* Command arguments handed from the shell to its spawned builtins. */
static PID_TO_KILL: AtomicU32 = AtomicU32::new(0);
static ALARM_TICKS: AtomicI32 = AtomicI32::new(0);

/// Fixed-size line formatter so builtins can compose output for `sysputs`
/// without an allocator. Overlong writes are truncated.
struct LineBuf {
    buf: [u8; 96],
    len: usize,
}

impl LineBuf {
    const fn new() -> Self {
        Self {
            buf: [0; 96],
            len: 0,
        }
    }

    fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl Write for LineBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if self.len == self.buf.len() {
                break;
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

/// The line up to its first newline, as a string.
fn line_of(buf: &[u8], n: usize) -> &str {
    let line = &buf[..n.min(buf.len())];
    let line = match line.iter().position(|&b| b == b'\n') {
        Some(pos) => &line[..pos],
        None => line,
    };
    core::str::from_utf8(line).unwrap_or("")
}

/// Authenticate a user on the console, then run the shell until it exits.
/// Loops forever.
pub extern "C" fn root() {
    loop {
        let mut user_buf = [0u8; LINE_LEN];
        let mut pass_buf = [0u8; LINE_LEN];

        sysputs("Welcome to Kestrel OS\n");
        let fd = sysopen(DEV_ID_KEYBOARD);

        sysputs("Username: ");
        let user_len = sysread(fd, &mut user_buf[..20]);

        sysioctl(fd, KEYBOARD_IOCTL_DISABLE_ECHO, 0);

        sysputs("Password: ");
        let pass_len = sysread(fd, &mut pass_buf[..20]);
        sysclose(fd);

        let user = line_of(&user_buf, user_len.max(0) as usize);
        let pass = line_of(&pass_buf, pass_len.max(0) as usize);

        if user == VALID_USER && pass == VALID_PASS {
            let shell_pid = syscreate(shell, DEFAULT_STACK_SIZE as i32);
            if shell_pid > 0 {
                syswait(shell_pid as u32);
            }
        } else {
            sysputs("\nInvalid username and/or password!\n\n");
        }
    }
}

/// The command loop: `ps`, `k <pid>`, `a <ticks>`, `t`, `ex`; a trailing
/// `&` runs the command detached.
extern "C" fn shell() {
    sysputs("\n");
    let fd = sysopen(DEV_ID_KEYBOARD);
    let mut buf = [0u8; 100];

    loop {
        buf.fill(0);
        sysputs("> ");
        let n = sysread(fd, &mut buf[..LINE_LEN]);
        if n == 0 {
            // EOF ends the session.
            break;
        }
        if n < 0 {
            continue;
        }

        let line = line_of(&buf, n as usize).trim();
        let detach = line.ends_with('&');
        let line = line.trim_end_matches('&').trim();

        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or("");
        let arg = words.next().unwrap_or("");

        let mut wait = true;
        let mut pid = 0;

        match command {
            "t" => {
                pid = syscreate(command_t, DEFAULT_STACK_SIZE as i32);
                wait = !detach;
            }
            "ps" => {
                pid = syscreate(command_ps, DEFAULT_STACK_SIZE as i32);
            }
            "a" => {
                ALARM_TICKS.store(arg.parse().unwrap_or(0), Ordering::Relaxed);
                pid = syscreate(command_a, DEFAULT_STACK_SIZE as i32);
            }
            "k" => {
                PID_TO_KILL.store(arg.parse().unwrap_or(0), Ordering::Relaxed);
                pid = syscreate(command_k, DEFAULT_STACK_SIZE as i32);
            }
            "ex" => break,
            "" => continue,
            _ => {
                sysputs("Invalid command!\n");
                continue;
            }
        }

        if wait && pid > 0 {
            syswait(pid as u32);
        }
    }

    sysputs("Logging out...\n");
    sysclose(fd);
}

/// List every live process with its detailed state and CPU time.
extern "C" fn command_ps() {
    let mut ps = ProcessStatuses::new();
    let last = sysgetcputimes(&mut ps);
    if last < 0 {
        sysputs("ps failed.\n");
        return;
    }

    sysputs("PID | State               | Time (ms)\n");
    for i in 0..=last as usize {
        let state = DETAILED_STATES
            .get(ps.status[i] as usize)
            .copied()
            .unwrap_or("?");
        let mut line = LineBuf::new();
        writeln!(line, "{:>4}  {:<20}  {:>8}", ps.pid[i], state, ps.cpu_time[i]).ok();
        sysputs(line.as_str());
    }
}

/// Kill the process named by the `k` command.
extern "C" fn command_k() {
    let pid = PID_TO_KILL.load(Ordering::Relaxed);
    if pid == 0 {
        sysputs("Cannot terminate idle proc.\n");
        return;
    }
    if syskill(pid, KILL_SIGNAL_NUM) != 0 {
        sysputs("No such process.\n");
    }
}

extern "C" fn alarm_handler(_cntx: usize) {
    let mut old = None;
    sysputs("ALARM ALARM ALARM\n");
    syssighandler(15, None, &mut old);
}

/// Arm signal 15 as an alarm, sleep the requested number of ticks, then
/// raise the alarm against ourselves.
extern "C" fn command_a() {
    let ticks = ALARM_TICKS.load(Ordering::Relaxed);
    if ticks <= 0 {
        sysputs("Usage: a SLEEP_TICKS\n");
        return;
    }

    let mut old = None;
    syssighandler(15, Some(alarm_handler), &mut old);
    syssleep(MS_PER_CLOCK_TICK * ticks as u32);
    syskill(sysgetpid(), 15);
}

/// Print a marker every ten seconds, forever.
extern "C" fn command_t() {
    loop {
        sysputs("T\n");
        syssleep(10_000);
    }
}
