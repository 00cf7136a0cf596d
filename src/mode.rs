use std::fmt;

/// Mode represents a file's mode and permission bits.
/// The bits have the same definition on all systems,
/// but not all bits apply to all systems.
///
/// It is modelled after Go's `os.FileMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(pub u32);

impl Mode {
    /// d: is a directory
    pub const DIR: Self = Self(1 << 31);
    /// L: symbolic link
    pub const SYMLINK: Self = Self(1 << 27);
    /// D: device file
    pub const DEVICE: Self = Self(1 << 26);
    /// p: named pipe (FIFO)
    pub const NAMED_PIPE: Self = Self(1 << 25);
    /// S: Unix domain socket
    pub const SOCKET: Self = Self(1 << 24);
    /// u: setuid
    pub const SETUID: Self = Self(1 << 23);
    /// g: setgid
    pub const SETGID: Self = Self(1 << 22);
    /// c: Unix character device, when DEVICE is set
    pub const CHAR_DEVICE: Self = Self(1 << 21);
    /// t: sticky
    pub const STICKY: Self = Self(1 << 20);

    /// Unix permission bits
    pub const PERM: Self = Self(0o777);

    /// The rwxrwxrwx bits only.
    pub fn permissions(self) -> u32 {
        self.0 & Self::PERM.0
    }

    /// True if this describes a directory.
    pub fn is_dir(self) -> bool {
        self.has(Self::DIR)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const FLAGS: [(Mode, char); 9] = [
            (Mode::DIR, 'd'),
            (Mode::SYMLINK, 'L'),
            (Mode::DEVICE, 'D'),
            (Mode::NAMED_PIPE, 'p'),
            (Mode::SOCKET, 'S'),
            (Mode::SETUID, 'u'),
            (Mode::SETGID, 'g'),
            (Mode::CHAR_DEVICE, 'c'),
            (Mode::STICKY, 't'),
        ];

        let mut w = 0;
        for (flag, c) in FLAGS {
            if self.has(flag) {
                write!(f, "{}", c)?;
                w += 1;
            }
        }
        if w == 0 {
            write!(f, "-")?;
        }

        let rwx = "rwxrwxrwx";
        for (i, c) in rwx.char_indices() {
            if self.has(Mode(1 << (9 - 1 - i))) {
                write!(f, "{}", c)?;
            } else {
                write!(f, "-")?;
            }
        }

        Ok(())
    }
}

impl From<UnixMode> for Mode {
    fn from(m: UnixMode) -> Self {
        let mut mode = Mode(m.0 & 0o777);

        match m & UnixMode::IFMT {
            UnixMode::IFBLK => mode |= Mode::DEVICE,
            UnixMode::IFCHR => mode |= Mode::DEVICE | Mode::CHAR_DEVICE,
            UnixMode::IFDIR => mode |= Mode::DIR,
            UnixMode::IFIFO => mode |= Mode::NAMED_PIPE,
            UnixMode::IFLNK => mode |= Mode::SYMLINK,
            UnixMode::IFREG => { /* nothing to do */ }
            UnixMode::IFSOCK => mode |= Mode::SOCKET,
            _ => {}
        }

        if m.has(UnixMode::ISGID) {
            mode |= Mode::SETGID
        }
        if m.has(UnixMode::ISUID) {
            mode |= Mode::SETUID
        }
        if m.has(UnixMode::ISVTX) {
            mode |= Mode::STICKY
        }

        mode
    }
}

/// A raw `st_mode`, as stored in the archive: file type bits plus
/// permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnixMode(pub u32);

impl UnixMode {
    /// Mask for the file type bits
    pub const IFMT: Self = Self(0o170000);
    /// Socket
    pub const IFSOCK: Self = Self(0o140000);
    /// Symbolic link
    pub const IFLNK: Self = Self(0o120000);
    /// Regular file
    pub const IFREG: Self = Self(0o100000);
    /// Block device
    pub const IFBLK: Self = Self(0o060000);
    /// Directory
    pub const IFDIR: Self = Self(0o040000);
    /// Character device
    pub const IFCHR: Self = Self(0o020000);
    /// FIFO
    pub const IFIFO: Self = Self(0o010000);
    /// Set user ID on execution
    pub const ISUID: Self = Self(0o4000);
    /// Set group ID on execution
    pub const ISGID: Self = Self(0o2000);
    /// Sticky bit
    pub const ISVTX: Self = Self(0o1000);
}

macro_rules! derive_bitops {
    ($T: ty) => {
        impl std::ops::BitOr for $T {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $T {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $T {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::ops::BitAndAssign for $T {
            fn bitand_assign(&mut self, rhs: Self) {
                self.0 &= rhs.0;
            }
        }

        impl $T {
            /// True if any of the bits in `rhs` are set.
            pub fn has(&self, rhs: Self) -> bool {
                self.0 & rhs.0 != 0
            }
        }
    };
}

derive_bitops!(Mode);
derive_bitops!(UnixMode);
