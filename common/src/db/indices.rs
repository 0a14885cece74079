use serde::{Deserialize, Serialize};
use std::fmt::Debug;

macro_rules! define_index {
    ($name:ident) => {
        #[derive(
            Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            #[inline(always)]
            pub fn new(id: usize) -> Self {
                Self(id as u32)
            }
            #[inline(always)]
            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_index!(NetId);
define_index!(PinId);
define_index!(ViaId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_index_is_zero() {
        assert_eq!(NetId::default(), NetId(0));
        assert_eq!(PinId::default().index(), 0);
        assert_eq!(format!("{:?}", ViaId::default()), "ViaId(0)");
    }
}
