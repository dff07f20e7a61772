use super::{ProcessLiveness, ProcessTable};

#[test]
pub fn own_process_is_alive() {
    assert!(ProcessTable.is_alive(std::process::id() as i32));
}

#[test]
pub fn pid_above_pid_max_is_dead() {
    assert!(!ProcessTable.is_alive(i32::MAX));
}

#[test]
pub fn process_groups_are_never_alive() {
    assert!(!ProcessTable.is_alive(0));
    assert!(!ProcessTable.is_alive(-1));
}

#[test]
pub fn reaped_child_is_dead() {
    let mut child = std::process::Command::new("true")
        .spawn()
        .expect("Failed to spawn `true`");
    let pid = child.id() as i32;
    child.wait().expect("Failed to wait for child");

    assert!(!ProcessTable.is_alive(pid));
}
