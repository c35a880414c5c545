use std::collections::{HashMap, VecDeque};

use insn_enhance::emulator::StepOutcome;
use insn_enhance::error::EmulationError;
use insn_enhance::{
    ArchInfo, Architecture, Condition, Config, Debuggee, EmulateMode, Emulator, EmulatorFactory,
    Session, Snapshot,
};

const BASE: u64 = 0x401000;

fn x64(code: &[u8]) -> Snapshot {
    let mut text = code.to_vec();
    text.resize(0x40, 0x90);
    Snapshot::new(ArchInfo::new(Architecture::X86_64))
        .with_register("rip", BASE)
        .with_register("rsp", 0x7ff0)
        .map(BASE, text, "r-x", "/bin/demo")
        .map(0x7000, vec![0u8; 0x1000], "rw-", "[stack]")
}

#[test]
fn rip_relative_load_through_bad_pointer() {
    // mov rax, qword ptr [rip + 0x10]
    let mut code = vec![0x48, 0x8b, 0x05, 0x10, 0x00, 0x00, 0x00];
    code.resize(0x17, 0x90);
    code.extend(0xdead_0000u64.to_le_bytes());
    let process = x64(&code);
    let mut session = Session::new(Config::default());

    let insn = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(insn.mnemonic, "mov");
    assert_eq!(insn.operands[1].before_value, Some(0x401017));
    assert_eq!(insn.operands[1].before_resolved, Some(0xdead_0000));
    assert_eq!(
        insn.annotation.as_deref(),
        Some("RAX, [0x401017] => 0xdead0000")
    );
}

#[test]
fn registers_at_pc_are_live_values() {
    // mov rbx, rax
    let process = x64(&[0x48, 0x89, 0xc3]).with_register("rax", 0x1234).with_register("rbx", 7);
    let mut session = Session::new(Config::default());

    let insn = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(insn.operands[0].before_value, Some(7));
    assert_eq!(insn.operands[1].before_value, Some(0x1234));
    assert_eq!(insn.operands[0].display.as_deref(), Some("RBX"));
}

#[test]
fn ret_away_from_pc_falls_through() {
    let process = x64(&[0x90, 0xc3]);
    let mut session = Session::new(Config::default());

    let ret = session.enhance_one(&process, BASE + 1).unwrap();
    assert_eq!(ret.next, BASE + 2);
    assert_eq!(ret.target, ret.next);
}

#[test]
fn ret_at_pc_reads_the_stack() {
    let mut process = x64(&[0xc3]);
    let mut stack = vec![0u8; 0x1000];
    stack[0xff0..0xff8].copy_from_slice(&(BASE + 0x20).to_le_bytes());
    process = process.map(0x7000, stack, "rw-", "[stack]");
    let mut session = Session::new(Config::default());

    let ret = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(ret.next, BASE + 0x20);
    assert_eq!(ret.target, BASE + 0x20);
}

#[test]
fn ret_imm_pops_from_top_of_stack() {
    // ret 0x10
    let mut stack = vec![0u8; 0x1000];
    stack[0xff0..0xff8].copy_from_slice(&(BASE + 0x20).to_le_bytes());
    let process = x64(&[0xc2, 0x10, 0x00]).map(0x7000, stack, "rw-", "[stack]");
    let mut session = Session::new(Config::default());

    let ret = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(ret.next, BASE + 0x20);
    assert_eq!(ret.target, BASE + 0x20);
}

#[test]
fn self_xor_is_zero_without_values() {
    // nop; xor eax, eax
    let process = x64(&[0x90, 0x31, 0xc0]);
    let mut session = Session::new(Config::default());

    let xor = session.enhance_one(&process, BASE + 1).unwrap();
    assert_eq!(xor.operands[0].before_value, None);
    assert_eq!(xor.annotation.as_deref(), Some("EAX => 0"));
}

#[test]
fn conditional_jumps_follow_flags() {
    const ZF: u64 = 1 << 6;
    // je +0xe / jne +0xe
    let je = x64(&[0x74, 0x0e]).with_register("eflags", ZF);
    let jne = x64(&[0x75, 0x0e]).with_register("eflags", ZF);
    let mut session = Session::new(Config::default());

    let taken = session.enhance_one(&je, BASE).unwrap();
    assert_eq!(taken.condition, Condition::True);
    assert_eq!(taken.next, BASE + 0x10);
    assert_eq!(taken.target_string.as_deref(), Some("0x401010"));

    let not_taken = session.enhance_one(&jne, BASE).unwrap();
    assert_eq!(not_taken.condition, Condition::False);
    assert_eq!(not_taken.next, BASE + 2);
    assert_eq!(not_taken.target, BASE + 0x10);
    assert!(!not_taken.is_conditional_jump_taken());
}

#[test]
fn cmp_explains_operands() {
    // cmp rax, 5
    let process = x64(&[0x48, 0x83, 0xf8, 0x05]).with_register("rax", 3);
    let mut session = Session::new(Config::default());

    let cmp = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(cmp.annotation.as_deref(), Some("3 - 5"));
}

#[test]
fn movaps_flags_misaligned_memory() {
    // movaps xmm0, xmmword ptr [rax]
    let code = [0x0f, 0x28, 0x00];
    let mut session = Session::new(Config::default());

    let misaligned = session
        .enhance_one(&x64(&code).with_register("rax", 0x7008), BASE)
        .unwrap();
    assert_eq!(
        misaligned.annotation.as_deref(),
        Some("<[0x7008] not aligned to 16 bytes>")
    );

    let aligned = session
        .enhance_one(&x64(&code).with_register("rax", 0x7010), BASE)
        .unwrap();
    assert_eq!(aligned.annotation, None);
}

#[test]
fn store_to_unmapped_memory() {
    // mov qword ptr [rax], rbx
    let process = x64(&[0x48, 0x89, 0x18])
        .with_register("rax", 0xdead_0000)
        .with_register("rbx", 1);
    let mut session = Session::new(Config::default());

    let mov = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(
        mov.annotation.as_deref(),
        Some("<Cannot dereference [0xdead0000]>")
    );
}

#[test]
fn lea_shows_computed_address() {
    // lea rdx, [rax + 0x20]
    let process = x64(&[0x48, 0x8d, 0x50, 0x20]).with_register("rax", 0x22);
    let mut session = Session::new(Config::default());

    let lea = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(lea.annotation.as_deref(), Some("RDX => 66"));
}

#[test]
fn xchg_swaps_values() {
    // xchg rbx, rax
    let process = x64(&[0x48, 0x87, 0xc3])
        .with_register("rax", 2)
        .with_register("rbx", 1);
    let mut session = Session::new(Config::default());

    let xchg = session.enhance_one(&process, BASE).unwrap();
    let annotation = xchg.annotation.unwrap();
    assert!(annotation.contains("RBX => 2"), "{}", annotation);
    assert!(annotation.contains("RAX => 1"), "{}", annotation);
}

#[test]
fn pop_reads_top_of_stack() {
    // pop rdx
    let mut stack = vec![0u8; 0x1000];
    stack[0xff0..0xff8].copy_from_slice(&66u64.to_le_bytes());
    let process = x64(&[0x5a]).map(0x7000, stack, "rw-", "[stack]");
    let mut session = Session::new(Config::default());

    let pop = session.enhance_one(&process, BASE).unwrap();
    assert_eq!(pop.annotation.as_deref(), Some("RDX => 66"));

    // Away from the PC the stack is unknown
    let away = session
        .enhance_one(&x64(&[0x90, 0x5a]), BASE + 1)
        .unwrap();
    assert_eq!(away.annotation, None);
}

#[test]
fn arithmetic_without_result_shows_expression() {
    let mut session = Session::new(Config::default());

    // add rax, 3
    let add = session
        .enhance_one(&x64(&[0x48, 0x83, 0xc0, 0x03]).with_register("rax", 4), BASE)
        .unwrap();
    assert_eq!(add.annotation.as_deref(), Some("RAX => 4 + 3"));

    // sub rax, rbx
    let sub = session
        .enhance_one(
            &x64(&[0x48, 0x29, 0xd8])
                .with_register("rax", 9)
                .with_register("rbx", 2),
            BASE,
        )
        .unwrap();
    assert_eq!(sub.annotation.as_deref(), Some("RAX => 9 - 2"));
}

/// Replays a fixed sequence of steps: each step moves the PC and writes
/// registers.
#[derive(Clone)]
struct Scripted {
    pc: u64,
    registers: HashMap<String, u64>,
    steps: VecDeque<(u64, Vec<(&'static str, u64)>)>,
}

impl Emulator for Scripted {
    fn pc(&self) -> u64 {
        self.pc
    }

    fn single_step(&mut self, _check_valid: bool) -> Result<StepOutcome, EmulationError> {
        let (next, writes) = self
            .steps
            .pop_front()
            .ok_or(EmulationError::StepFailed { address: self.pc })?;
        let outcome = StepOutcome {
            address: self.pc,
            size: next.wrapping_sub(self.pc),
        };
        for (name, value) in writes {
            self.registers.insert(name.to_string(), value);
        }
        self.pc = next;
        Ok(outcome)
    }

    fn read_register(&self, name: &str) -> Option<u64> {
        self.registers.get(name).copied()
    }

    fn telescope(&self, address: u64, _limit: usize, _read_size: Option<usize>) -> Vec<u64> {
        vec![address]
    }

    fn format_telescope(&self, addresses: &[u64], _limit: usize, _string_length: usize) -> String {
        let parts: Vec<String> = addresses.iter().map(|a| format!("{:#x}", a)).collect();
        parts.join(" -> ")
    }
}

struct ScriptedFactory {
    script: Scripted,
    /// Start the emulator this far from the process PC.
    pc_skew: u64,
}

impl EmulatorFactory for ScriptedFactory {
    fn supports(&self, arch: Architecture) -> bool {
        arch == Architecture::X86_64
    }

    fn create(&self, process: &dyn Debuggee) -> Result<Box<dyn Emulator>, EmulationError> {
        let mut emu = self.script.clone();
        emu.pc = process.pc().unwrap_or_default() + self.pc_skew;
        for name in ["rax", "rip", "rsp"] {
            if let Some(value) = process.register(name) {
                emu.registers.insert(name.to_string(), value);
            }
        }
        Ok(Box::new(emu))
    }
}

fn script(steps: Vec<(u64, Vec<(&'static str, u64)>)>) -> Scripted {
    Scripted {
        pc: 0,
        registers: HashMap::new(),
        steps: VecDeque::from(steps),
    }
}

fn emulating_session(config: Config, script: Scripted, pc_skew: u64) -> Session {
    Session::new(config)
        .with_emulator_factory(Box::new(ScriptedFactory { script, pc_skew }))
        .with_resource_probe(|| Ok(()))
}

fn xor_then_nops() -> (Snapshot, Session, Session) {
    // xor rax, rax; nop; nop
    let process = x64(&[0x48, 0x31, 0xc0, 0x90, 0x90]).with_register("rax", 0x1234);
    let steps = script(vec![
        (BASE + 3, vec![("rax", 0), ("rip", BASE + 3)]),
        (BASE + 4, vec![("rip", BASE + 4)]),
        (BASE + 5, vec![("rip", BASE + 5)]),
    ]);

    let emulating = emulating_session(Config::default(), steps.clone(), 0);
    let jumps_only = emulating_session(
        Config {
            emulate: EmulateMode::JumpsOnly,
            ..Config::default()
        },
        steps,
        0,
    );

    (process, emulating, jumps_only)
}

#[test]
fn emulated_xor_clears_destination() {
    let (process, mut session, _) = xor_then_nops();

    let window = session.near(&process, BASE, 1, true, false);
    assert_eq!(window.len(), 3);

    let xor = &window[0];
    assert!(xor.emulated);
    assert_eq!(xor.operands[0].before_value, Some(0x1234));
    assert_eq!(xor.operands[0].after_value, Some(0));
    assert_eq!(xor.annotation.as_deref(), Some("RAX => 0"));
    assert_eq!(xor.next, BASE + 3);
    assert!(window[1].emulated);
}

#[test]
fn jumps_only_keeps_emulator_out_of_values() {
    let (process, _, mut session) = xor_then_nops();

    let window = session.near(&process, BASE, 1, true, false);
    let xor = &window[0];
    assert!(xor.emulated);
    assert_eq!(xor.operands[0].before_value, Some(0x1234));
    assert_eq!(xor.operands[0].after_value, None);
    assert_eq!(xor.next, BASE + 3);
}

#[test]
fn emulator_unused_away_from_pc() {
    let (process, mut session, _) = xor_then_nops();

    let window = session.near(&process, BASE + 3, 1, true, false);
    assert!(window.iter().all(|insn| !insn.emulated));
}

#[test]
fn failed_step_falls_back_to_static_walk() {
    // xor rax, rax; nop; nop, but the emulator only manages the xor
    let process = x64(&[0x48, 0x31, 0xc0, 0x90, 0x90]).with_register("rax", 0x1234);
    let steps = script(vec![(BASE + 3, vec![("rax", 0), ("rip", BASE + 3)])]);
    let mut session = emulating_session(Config::default(), steps, 0);

    let window = session.near(&process, BASE, 1, true, false);
    let addresses: Vec<u64> = window.iter().map(|insn| insn.address).collect();
    assert_eq!(addresses, vec![BASE, BASE + 3, BASE + 4]);
    assert!(window[0].emulated);
    assert!(!window[1].emulated);
    assert_eq!(window[1].next, BASE + 4);
    assert!(!window[2].emulated);
}

#[test]
fn call_is_stepped_over_not_emulated() {
    // call +0x10; nop ...
    let process = x64(&[0xe8, 0x10, 0x00, 0x00, 0x00]);
    let steps = script(vec![
        (BASE + 0x15, vec![("rip", BASE + 0x15)]),
        (BASE + 0x16, vec![("rip", BASE + 0x16)]),
    ]);
    let mut session = emulating_session(Config::default(), steps, 0);

    let window = session.near(&process, BASE, 1, true, false);
    let call = &window[0];
    assert!(!call.emulated);
    assert_eq!(call.next, BASE + 5);
    assert_eq!(call.target, BASE + 0x15);
    assert_eq!(window[1].address, BASE + 5);
    assert!(!window[1].emulated);
}

#[test]
fn emulator_at_wrong_pc_is_dropped() {
    let process = x64(&[0x48, 0x31, 0xc0, 0x90, 0x90]).with_register("rax", 0x1234);
    let steps = script(vec![(BASE + 4, vec![("rax", 0)])]);
    let mut session = emulating_session(Config::default(), steps, 1);

    let window = session.near(&process, BASE, 1, true, false);
    assert!(window.iter().all(|insn| !insn.emulated));
    assert_eq!(window[0].operands[0].after_value, None);
    assert_eq!(window[0].next, BASE + 3);
}
