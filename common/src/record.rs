use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The allocator entry points vizzy interposes on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Malloc,
    Calloc,
    Realloc,
    Free,
    Mmap,
    Munmap,
    PosixMemalign,
    AlignedAlloc,
    Valloc,
    Strdup,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::Malloc,
        Operation::Calloc,
        Operation::Realloc,
        Operation::Free,
        Operation::Mmap,
        Operation::Munmap,
        Operation::PosixMemalign,
        Operation::AlignedAlloc,
        Operation::Valloc,
        Operation::Strdup,
    ];

    /// The C symbol name, which is also what the trace log carries.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Malloc           => "malloc",
            Operation::Calloc           => "calloc",
            Operation::Realloc          => "realloc",
            Operation::Free             => "free",
            Operation::Mmap             => "mmap",
            Operation::Munmap           => "munmap",
            Operation::PosixMemalign    => "posix_memalign",
            Operation::AlignedAlloc     => "aligned_alloc",
            Operation::Valloc           => "valloc",
            Operation::Strdup           => "strdup",
        }
    }

    /// `free` is the only operation that never knows a size.
    pub const fn carries_size(&self) -> bool {
        !matches!(self, Operation::Free)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL.iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| LineError::Operation(s.to_string()))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LineError {
    #[error("expected 5 comma-separated fields, found {0}")]
    FieldCount(usize),
    #[error("bad timestamp field: {0:?}")]
    Timestamp(String),
    #[error("unknown operation: {0:?}")]
    Operation(String),
    #[error("bad pointer field: {0:?}")]
    Pointer(String),
    #[error("bad size field for {op}: {field:?}")]
    Size { op: Operation, field: String },
}

/// One line of a vizzy log, i.e. `sec,usec,op,ptr,size`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TraceLine {
    pub sec:    u64,
    pub usec:   u32,
    pub op:     Operation,
    pub ptr:    usize,
    pub size:   Option<usize>,
}

impl FromStr for TraceLine {
    type Err = LineError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.trim_end_matches('\n').split(',').collect();
        if fields.len() != 5 {
            return Err(LineError::FieldCount(fields.len()));
        }
        let sec = fields[0].parse::<u64>()
            .map_err(|_| LineError::Timestamp(fields[0].to_string()))?;
        let usec = fields[1].parse::<u32>()
            .ok()
            .filter(|u| *u < 1_000_000)
            .ok_or_else(|| LineError::Timestamp(fields[1].to_string()))?;
        let op: Operation = fields[2].parse()?;
        let ptr = fields[3].strip_prefix("0x")
            .and_then(|hex| usize::from_str_radix(hex, 16).ok())
            .ok_or_else(|| LineError::Pointer(fields[3].to_string()))?;
        let size = match (op.carries_size(), fields[4]) {
            (false, "")     => { None },
            (true, field)   => {
                Some(field.parse::<usize>().map_err(|_| LineError::Size {
                    op,
                    field: field.to_string(),
                })?)
            },
            (false, field)  => {
                return Err(LineError::Size { op, field: field.to_string() });
            }
        };

        Ok(Self { sec, usec, op, ptr, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_parses_back_from_its_name() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>(), Ok(op));
        }
        assert!("memalign".parse::<Operation>().is_err());
    }

    #[test]
    fn malloc_line() {
        let line: TraceLine = "1700000000,42,malloc,0x5555deadbeef,64\n".parse().unwrap();
        assert_eq!(line.sec, 1_700_000_000);
        assert_eq!(line.usec, 42);
        assert_eq!(line.op, Operation::Malloc);
        assert_eq!(line.ptr, 0x5555_dead_beef);
        assert_eq!(line.size, Some(64));
    }

    #[test]
    fn free_line_has_empty_size() {
        let line: TraceLine = "1,2,free,0x10,".parse().unwrap();
        assert_eq!(line.op, Operation::Free);
        assert_eq!(line.size, None);

        assert!(matches!(
            "1,2,free,0x10,8".parse::<TraceLine>(),
            Err(LineError::Size { op: Operation::Free, .. })
        ));
    }

    #[test]
    fn sized_operations_require_a_size() {
        assert!(matches!(
            "1,2,calloc,0x10,".parse::<TraceLine>(),
            Err(LineError::Size { op: Operation::Calloc, .. })
        ));
    }

    #[test]
    fn malformed_lines() {
        assert_eq!("1,2,malloc,0x10".parse::<TraceLine>(), Err(LineError::FieldCount(4)));
        assert!(matches!("1,2000000,malloc,0x10,1".parse::<TraceLine>(), Err(LineError::Timestamp(_))));
        assert!(matches!("1,2,malloc,10,1".parse::<TraceLine>(), Err(LineError::Pointer(_))));
    }
}
