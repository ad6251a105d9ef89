// Interrupt Descriptor Table

use lazy_static::lazy_static;
use x86_64::registers::control::{Cr0, Cr2, Cr3, Cr4};
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::panic::ExceptionFrame;

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.divide_error.set_handler_fn(divide_error_handler);
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault.set_handler_fn(general_protection_fault_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);
        }
        // Add timer interrupt handler (IRQ0 = interrupt 32)
        idt[32].set_handler_fn(timer_interrupt_handler);
        idt
    };
}

#[allow(dead_code)]
pub fn init() {
    IDT.load();
}

/// Build a register snapshot for `vector`/`error_code` out of what the
/// `x86-interrupt` calling convention and control registers expose. General
/// purpose registers (rax, rbx, ...) aren't saved by this calling convention
/// without hand-written trap-entry assembly, so they're left zeroed — a
/// known gap noted in the panic module's own docs.
fn capture_frame(vector: u64, error_code: u64, stack_frame: &InterruptStackFrame) -> ExceptionFrame {
    ExceptionFrame {
        vector,
        error_code,
        instruction_pointer: stack_frame.instruction_pointer.as_u64(),
        stack_pointer: stack_frame.stack_pointer.as_u64(),
        code_segment: stack_frame.code_segment.0 as u64,
        stack_segment: stack_frame.stack_segment.0 as u64,
        cr0: Cr0::read().bits(),
        cr2: Cr2::read().as_u64(),
        cr3: Cr3::read().0.start_address().as_u64(),
        cr4: Cr4::read().bits(),
        rflags: stack_frame.cpu_flags.bits(),
        ..ExceptionFrame::default()
    }
}

extern "x86-interrupt" fn divide_error_handler(stack_frame: InterruptStackFrame) {
    crate::panic::enter(capture_frame(0, 0, &stack_frame));
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    crate::panic::enter(capture_frame(6, 0, &stack_frame));
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    crate::panic::enter(capture_frame(8, error_code, &stack_frame));
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    crate::panic::enter(capture_frame(14, error_code.bits(), &stack_frame));
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::panic::enter(capture_frame(13, error_code, &stack_frame));
}

extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    // Acknowledge the interrupt by sending End of Interrupt (EOI) to PIC
    unsafe {
        // Send EOI to the master PIC (0x20)
        use x86_64::instructions::port::Port;
        let mut pic_command: Port<u8> = Port::new(0x20);
        pic_command.write(0x20); // EOI command
    }
}
