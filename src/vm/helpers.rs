//! External runtime helpers called from generated code.
//!
//! Every helper follows the same convention: the runtime context is passed in
//! `x0`, frame values are passed by address unless noted otherwise, and the
//! result (if any) comes back in `x0`, `w0` or `d0`.

use std::fmt;

macro_rules! helpers {
    ($($variant:ident => $name:literal,)*) => {
        /// A runtime entry point reachable from generated code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Helper {
            $($variant,)*
        }

        impl Helper {
            pub const ALL: &'static [Helper] = &[$(Helper::$variant,)*];
            pub const COUNT: usize = Helper::ALL.len();

            /// Symbol name, used for thunk labels and listings.
            pub fn name(self) -> &'static str {
                match self {
                    $(Helper::$variant => $name,)*
                }
            }
        }
    };
}

helpers! {
    // (rt)
    CheckNativeStackOverflow => "check_native_stack_overflow",
    // (rt, locals, nregs: u32) -> frame base
    Enter => "enter",
    // (rt, locals, frame)
    Leave => "leave",
    // (rt, module, id: u32) -> value
    GetBytecodeString => "get_bytecode_string",
    // (rt, &value) -> f64 in d0
    ToDouble => "to_double",
    // (rt, value) -> bool in w0
    ToBoolean => "to_boolean",
    // (rt, sym: u32)
    DeclareGlobalVar => "declare_global_var",
    // (rt, parent: *const value or null, size: u32) -> value
    CreateEnvironment => "create_environment",
    // (rt, env, value, slot: u32)
    StoreToEnv => "store_to_env",
    StoreNpToEnv => "store_np_to_env",
    // (rt, &env, module, function: u32) -> value
    CreateClosure => "create_closure",
    // (rt, &source, sym: u32, cache) -> value
    GetById => "get_by_id",
    TryGetById => "try_get_by_id",
    // (rt, &target, sym: u32, &value, cache)
    PutByIdStrict => "put_by_id_strict",
    PutByIdLoose => "put_by_id_loose",
    TryPutByIdStrict => "try_put_by_id_strict",
    TryPutByIdLoose => "try_put_by_id_loose",
    // (rt, &source, &key) -> value
    GetByVal => "get_by_val",
    // (rt, &target, &key, &value)
    PutByValStrict => "put_by_val_strict",
    PutByValLoose => "put_by_val_loose",
    // (rt, &source, index: u32) -> value
    GetByIndex => "get_by_index",
    // (rt, &left, &right) -> value
    IsIn => "is_in",
    // (rt, frame, argc without this: u32) -> value
    Call => "call",
    // (rt, frame, argc without this: u32, builtin: u32) -> value
    CallBuiltin => "call_builtin",
    // (rt, builtin: u32) -> value
    GetBuiltinClosure => "get_builtin_closure",
    // (rt, &left, &right) -> value
    Add => "add",
    Sub => "sub",
    Mul => "mul",
    Div => "div",
    // (rt, &value) -> value
    Negate => "negate",
    Inc => "inc",
    Dec => "dec",
    // (rt, &left, &right) -> bool in w0
    Less => "less",
    LessEqual => "less_equal",
    Greater => "greater",
    GreaterEqual => "greater_equal",
    Equal => "equal",
    NotEqual => "not_equal",
    StrictEqual => "strict_equal",
    StrictNotEqual => "strict_not_equal",
}

impl Helper {
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Addresses of every runtime helper.
#[derive(Debug, Clone)]
pub struct HelperTable {
    addrs: [u64; Helper::COUNT],
}

impl HelperTable {
    /// Build a table by asking `resolve` for each helper's address.
    pub fn new(mut resolve: impl FnMut(Helper) -> u64) -> Self {
        let mut addrs = [0; Helper::COUNT];
        for &helper in Helper::ALL {
            addrs[helper.index()] = resolve(helper);
        }
        Self { addrs }
    }

    pub fn address(&self, helper: Helper) -> u64 {
        self.addrs[helper.index()]
    }

    /// Reverse lookup, used by the simulator to dispatch branches.
    pub fn lookup(&self, addr: u64) -> Option<Helper> {
        Helper::ALL
            .iter()
            .copied()
            .find(|&h| self.addrs[h.index()] == addr)
    }
}
