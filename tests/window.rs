use insn_enhance::{ArchInfo, Architecture, Config, Session, Snapshot};

const NOP: [u8; 4] = [0x1f, 0x20, 0x03, 0xd5];
const BRANCH_TO_SELF: [u8; 4] = [0x00, 0x00, 0x00, 0x14];

fn aarch64(pc: u64, code: Vec<u8>) -> Snapshot {
    Snapshot::new(ArchInfo::new(Architecture::Aarch64))
        .with_register("pc", pc)
        .with_register("sp", 0x8000)
        .map(0x1000, code, "r-x", "/bin/demo")
}

fn addresses(window: &[insn_enhance::Instruction]) -> Vec<u64> {
    window.iter().map(|insn| insn.address).collect()
}

#[test]
fn straight_line_window() {
    let process = aarch64(0x1000, NOP.repeat(10));
    let mut session = Session::new(Config::default());

    let window = session.near(&process, 0x1000, 3, false, true);
    assert_eq!(
        addresses(&window),
        vec![0x1000, 0x1004, 0x1008, 0x100c, 0x1010, 0x1014, 0x1018]
    );
}

#[test]
fn history_comes_from_earlier_windows() {
    let mut session = Session::new(Config::default());
    session.enhance_window(&aarch64(0x1000, NOP.repeat(10)), 3, false, true);

    let window = session.enhance_window(&aarch64(0x100c, NOP.repeat(10)), 3, false, true);
    assert_eq!(window.len(), 7);
    assert!(window.windows(2).all(|pair| pair[0].address < pair[1].address));
    assert_eq!(window[3].address, 0x100c);

    let no_history = session.enhance_window(&aarch64(0x100c, NOP.repeat(10)), 3, false, false);
    assert_eq!(no_history.first().map(|insn| insn.address), Some(0x100c));
}

#[test]
fn tight_loop_keeps_two_copies() {
    let mut code = BRANCH_TO_SELF.to_vec();
    code.extend(NOP.repeat(4));
    let process = aarch64(0x1000, code);
    let mut session = Session::new(Config::default());

    let window = session.near(&process, 0x1000, 3, false, true);
    assert_eq!(addresses(&window), vec![0x1000, 0x1000]);
    assert_eq!(window[0].next, 0x1000);
}

#[test]
fn window_stops_at_unmapped_memory() {
    let process = aarch64(0x1000, NOP.repeat(2));
    let mut session = Session::new(Config::default());

    let window = session.near(&process, 0x1000, 3, false, true);
    assert_eq!(addresses(&window), vec![0x1000, 0x1004]);
}

#[test]
fn targets_never_unresolved() {
    let process = aarch64(0x1000, NOP.repeat(10));
    let mut session = Session::new(Config::default());

    for insn in session.near(&process, 0x1000, 3, false, true) {
        assert_eq!(insn.target, insn.next);
        assert_eq!(insn.next, insn.address + 4);
        assert!(insn.target_string.is_none());
    }
}
