//! The dispatcher: the kernel's single thread of control.
//!
//! Forever: deliver any eligible pending signal to the process about to
//! run, switch into it, and act on the request tag that brings control
//! back. Handlers either leave the current process in place with a result
//! in its saved `ret`, or reassign `current` from the ready queue.

use crate::ctsw;
use crate::kernel::Kernel;
use crate::signal;
use crate::syscall::Request;

pub fn dispatch(kernel: &mut Kernel) -> ! {
    kernel.pick_next();
    loop {
        let pcb = kernel.current_pcb();
        if pcb.sig_pending != 0 {
            signal::deliver_pending(pcb);
        }

        let raw = ctsw::context_switch(kernel.current_pcb());

        match Request::from_raw(raw) {
            Some(Request::TimerInt) => {
                crate::logger::record_tick();
                kernel.handle_request(Request::TimerInt);
            }
            Some(request) => kernel.handle_request(request),
            None => {
                crate::kfatal!(
                    "Invalid syscall request {} from pid {}; halting",
                    raw,
                    kernel.current_pcb().pid
                );
                crate::arch::halt_loop();
            }
        }
    }
}
