/// Logical key set shared between front-ends and emulator apps.
///
/// Front-ends translate their native key codes into this enum so that the
/// emulator crates never depend on a windowing library.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Key {
    None,
    Num1,
    Num2,
    A,
    C,
    D,
    J,
    K,
    L,
    N,
    P,
    S,
    T,
    X,
    Z,
    Left,
    Right,
    Space,
    Shift,
}
