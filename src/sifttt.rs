//! Sifttt: Single-file Solana program with embedded health-factor engine.

#![deny(unsafe_code)]

pub mod engine;

// 1. mod constants
pub mod constants {
    use core::mem::size_of;
    use memoffset::offset_of;
    use crate::engine::Position;
    use crate::state::RecordHeader;

    pub const MAGIC: u64 = 0x5349465454544846; // "SIFTTTHF"
    pub const VERSION: u32 = 1;

    pub const HEADER_LEN: usize = size_of::<RecordHeader>();
    pub const POSITION_OFF: usize = HEADER_LEN;
    pub const POSITION_LEN: usize = size_of::<Position>();
    pub const RECORD_LEN: usize = POSITION_OFF + POSITION_LEN;

    // Absolute offsets inside the record, for memcmp filters on the client side
    pub const OWNER_OFF: usize = POSITION_OFF + offset_of!(Position, owner);
    pub const HEALTH_FACTOR_OFF: usize = POSITION_OFF + offset_of!(Position, health_factor);
    pub const AUTOMATION_ENABLED_OFF: usize = POSITION_OFF + offset_of!(Position, automation_enabled);
}

// 2. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use num_traits::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;
    use crate::engine::EngineError;

    /// Custom program errors. Codes follow declaration order and are part of the
    /// client ABI; append only.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error, FromPrimitive)]
    pub enum SiftttError {
        #[error("Record is already initialized")]
        AlreadyInitialized,
        #[error("Record is not initialized")]
        NotInitialized,
        #[error("Record version is not supported")]
        InvalidVersion,
        #[error("Record has the wrong length")]
        InvalidRecordLen,
        #[error("Expected signer")]
        ExpectedSigner,
        #[error("Expected writable account")]
        ExpectedWritable,
        #[error("Caller is not authorized for this record")]
        Unauthorized,
        #[error("Health factor parameter out of range")]
        InvalidParameter,
        #[error("Automation is not enabled")]
        AutomationDisabled,
    }

    impl SiftttError {
        pub fn from_code(code: u32) -> Option<Self> {
            Self::from_u32(code)
        }
    }

    impl From<SiftttError> for ProgramError {
        fn from(e: SiftttError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for SiftttError {
        fn type_of() -> &'static str {
            "SiftttError"
        }
    }

    impl PrintProgramError for SiftttError {
        fn print<E>(&self)
        where
            E: 'static + std::error::Error + DecodeError<E> + PrintProgramError + FromPrimitive,
        {
            msg!("Error: {}", self);
        }
    }

    pub fn map_engine_error(e: EngineError) -> ProgramError {
        let err = match e {
            EngineError::Unauthorized => SiftttError::Unauthorized,
            EngineError::InvalidParameter => SiftttError::InvalidParameter,
            EngineError::AutomationDisabled => SiftttError::AutomationDisabled,
        };
        ProgramError::Custom(err as u32)
    }
}

// 3. mod ix
pub mod ix {
    use arrayref::array_ref;
    use solana_program::program_error::ProgramError;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Instruction {
        Initialize,
        SetAutomation { trigger_health_factor: u8, target_health_factor: u8 },
        Borrow,
        Repay,
        AutoRepay,
        Deposit,
        Withdraw,
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, rest) = input.split_first().ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => Ok(Instruction::Initialize),
                1 => { // SetAutomation
                    let (trigger_health_factor, target_health_factor) = read_health_pair(rest)?;
                    Ok(Instruction::SetAutomation { trigger_health_factor, target_health_factor })
                },
                2 => Ok(Instruction::Borrow),
                3 => Ok(Instruction::Repay),
                4 => Ok(Instruction::AutoRepay),
                5 => Ok(Instruction::Deposit),
                6 => Ok(Instruction::Withdraw),
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }
    }

    fn read_health_pair(input: &[u8]) -> Result<(u8, u8), ProgramError> {
        if input.len() < 2 { return Err(ProgramError::InvalidInstructionData); }
        let &[trigger, target] = array_ref![input, 0, 2];
        Ok((trigger, target))
    }
}

// 4. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::error::SiftttError;

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(SiftttError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(SiftttError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }
}

// 5. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use solana_program::account_info::AccountInfo;
    use solana_program::program_error::ProgramError;
    use crate::constants::{HEADER_LEN, POSITION_OFF, POSITION_LEN};
    use crate::engine::Position;

    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
    pub struct RecordHeader {
        pub magic: u64,
        pub version: u32,
        pub _padding: [u8; 4],
    }

    pub fn record_data_mut<'a, 'b>(ai: &'b AccountInfo<'a>) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    pub fn read_header(data: &[u8]) -> RecordHeader {
        let mut h = RecordHeader::zeroed();
        let src = &data[..HEADER_LEN];
        let dst = bytemuck::bytes_of_mut(&mut h);
        dst.copy_from_slice(src);
        h
    }

    pub fn write_header(data: &mut [u8], h: &RecordHeader) {
        let src = bytemuck::bytes_of(h);
        let dst = &mut data[..HEADER_LEN];
        dst.copy_from_slice(src);
    }

    pub fn read_position(data: &[u8]) -> Position {
        let mut p = Position::zeroed();
        let src = &data[POSITION_OFF..POSITION_OFF + POSITION_LEN];
        let dst = bytemuck::bytes_of_mut(&mut p);
        dst.copy_from_slice(src);
        p
    }

    pub fn write_position(data: &mut [u8], p: &Position) {
        let src = bytemuck::bytes_of(p);
        let dst = &mut data[POSITION_OFF..POSITION_OFF + POSITION_LEN];
        dst.copy_from_slice(src);
    }
}

// 6. mod verify (pure predicates shared by the engine and the proofs)
pub mod verify {
    use crate::engine::HEALTH_FACTOR_MAX;

    #[inline]
    pub fn owner_ok(stored: [u8; 32], signer: [u8; 32]) -> bool {
        stored == signer
    }

    #[inline]
    pub fn health_in_range(value: u8) -> bool {
        value <= HEALTH_FACTOR_MAX
    }
}

// 7. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo, entrypoint::ProgramResult, msg, pubkey::Pubkey,
        program_error::ProgramError,
    };
    #[cfg(feature = "cu-audit")]
    use solana_program::log::sol_log_compute_units;
    use crate::{
        ix::Instruction,
        state::{self, RecordHeader},
        accounts,
        constants::{MAGIC, VERSION, RECORD_LEN},
        engine::{OwnerOnly, Position, PositionEngine, StepPolicy},
        error::{SiftttError, map_engine_error},
    };

    const ENGINE: PositionEngine<OwnerOnly> = PositionEngine::new(StepPolicy::DEFAULT, OwnerOnly);

    fn record_guard(program_id: &Pubkey, record: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(record, program_id)?;
        if data.len() != RECORD_LEN { return Err(SiftttError::InvalidRecordLen.into()); }
        Ok(())
    }

    fn require_initialized(data: &[u8]) -> Result<(), ProgramError> {
        let h = state::read_header(data);
        if h.magic != MAGIC { return Err(SiftttError::NotInitialized.into()); }
        if h.version != VERSION { return Err(SiftttError::InvalidVersion.into()); }
        Ok(())
    }

    fn load_position(data: &[u8]) -> Result<Position, ProgramError> {
        let position = state::read_position(data);
        if !position.is_well_formed() { return Err(ProgramError::InvalidAccountData); }
        Ok(position)
    }

    /// Validate the owner/record pair, run `op` on a copy of the stored position
    /// and write it back only if `op` succeeds.
    fn with_position<'a, F>(program_id: &Pubkey, accounts: &[AccountInfo<'a>], op: F) -> ProgramResult
    where
        F: FnOnce(&mut Position, &[u8; 32]) -> ProgramResult,
    {
        accounts::expect_len(accounts, 2)?;
        let a_owner = &accounts[0];
        let a_record = &accounts[1];

        accounts::expect_signer(a_owner)?;
        accounts::expect_writable(a_record)?;

        let mut data = state::record_data_mut(a_record)?;
        record_guard(program_id, a_record, &data)?;
        require_initialized(&data)?;
        let mut position = load_position(&data)?;

        op(&mut position, &a_owner.key.to_bytes())?;

        state::write_position(&mut data, &position);
        Ok(())
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: instruction_start");
            sol_log_compute_units();
        }

        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::Initialize => {
                accounts::expect_len(accounts, 2)?;
                let a_owner = &accounts[0];
                let a_record = &accounts[1];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_record)?;

                let mut data = state::record_data_mut(a_record)?;
                record_guard(program_id, a_record, &data)?;

                let header = state::read_header(&data);
                if header.magic == MAGIC { return Err(SiftttError::AlreadyInitialized.into()); }

                for b in data.iter_mut() { *b = 0; }

                let position = ENGINE.initialize(a_owner.key.to_bytes());
                state::write_position(&mut data, &position);

                let new_header = RecordHeader {
                    magic: MAGIC,
                    version: VERSION,
                    _padding: [0; 4],
                };
                state::write_header(&mut data, &new_header);

                msg!("Initialize: owner {} health_factor {}", a_owner.key, position.health_factor);
            },
            Instruction::SetAutomation { trigger_health_factor, target_health_factor } => {
                with_position(program_id, accounts, |position, caller| {
                    ENGINE
                        .set_automation(position, caller, trigger_health_factor, target_health_factor)
                        .map_err(map_engine_error)?;
                    msg!("SetAutomation: trigger {} target {}", trigger_health_factor, target_health_factor);
                    Ok(())
                })?;
            },
            Instruction::Borrow => {
                with_position(program_id, accounts, |position, caller| {
                    let before = position.health_factor;
                    let after = ENGINE.borrow(position, caller).map_err(map_engine_error)?;
                    msg!("Borrow: health_factor {} -> {}", before, after);
                    Ok(())
                })?;
            },
            Instruction::Repay => {
                with_position(program_id, accounts, |position, caller| {
                    let before = position.health_factor;
                    let after = ENGINE.repay(position, caller).map_err(map_engine_error)?;
                    msg!("Repay: health_factor {} -> {}", before, after);
                    Ok(())
                })?;
            },
            Instruction::AutoRepay => {
                with_position(program_id, accounts, |position, caller| {
                    let outcome = ENGINE.auto_repay(position, caller).map_err(map_engine_error)?;
                    if outcome.triggered {
                        msg!(
                            "AutoRepay: health_factor {} -> {} in {} steps",
                            outcome.health_before, outcome.health_after, outcome.steps
                        );
                    } else {
                        msg!(
                            "AutoRepay: health_factor {} above trigger {}, skipped",
                            outcome.health_before, position.trigger_health_factor
                        );
                    }
                    Ok(())
                })?;
            },
            Instruction::Deposit => {
                with_position(program_id, accounts, |position, caller| {
                    ENGINE.authorize(position, caller).map_err(map_engine_error)?;
                    msg!("Deposit: health_factor {}", position.health_factor);
                    Ok(())
                })?;
            },
            Instruction::Withdraw => {
                with_position(program_id, accounts, |position, caller| {
                    ENGINE.authorize(position, caller).map_err(map_engine_error)?;
                    msg!("Withdraw: health_factor {}", position.health_factor);
                    Ok(())
                })?;
            },
        }

        #[cfg(feature = "cu-audit")]
        {
            msg!("CU_CHECKPOINT: instruction_end");
            sol_log_compute_units();
        }

        Ok(())
    }
}

// 8. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
#[allow(unsafe_code)]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::SiftttError, processor};

    entrypoint!(process_instruction);

    fn process_instruction<'a>(
        program_id: &Pubkey,
        accounts: &'a [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data) {
            error.print::<SiftttError>();
            return Err(error);
        }
        Ok(())
    }
}
