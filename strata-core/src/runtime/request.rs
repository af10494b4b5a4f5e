//! Requests understood by the access processor.

use crate::data::{
    AccessDescriptor, AccessMode, AccessParams, DataId, DataLocation, ObjectCode, ObjectValue,
    Renaming, ResultFile,
};
use crate::error::Result;
use crate::graph::{AppId, TaskDescription, TaskId, TaskOutcome, TaskStateReport};
use crate::reply::{Pending, Reply};

/// A result file together with the completion of its transfer.
pub(crate) type OrderedResult = (ResultFile, Pending<Result<DataLocation>>);

pub(crate) enum Request {
    TaskAnalysis {
        task_id: TaskId,
        description: TaskDescription,
    },
    TaskEnd(TaskOutcome),
    RegisterDataAccess {
        params: AccessParams,
        reply: Reply<AccessDescriptor>,
    },
    AlreadyAccessed {
        location: DataLocation,
        reply: Reply<bool>,
    },
    WaitForTask {
        data_id: DataId,
        mode: AccessMode,
        reply: Reply<Result<()>>,
    },
    /// Copy the version read by a main file access into the working
    /// directory.
    TransferOpenFile {
        access: AccessDescriptor,
        reply: Reply<Result<DataLocation>>,
    },
    TransferObject {
        access: AccessDescriptor,
        reply: Reply<Result<ObjectValue>>,
    },
    /// Close a main-program access once its value has been handled.
    DataAccessed {
        access: AccessDescriptor,
    },
    RegisterLocation {
        renaming: Renaming,
        location: DataLocation,
    },
    FinishFileAccess {
        mode: AccessMode,
        location: DataLocation,
    },
    IsObjectHere {
        code: ObjectCode,
        reply: Reply<bool>,
    },
    GetLastRenaming {
        code: ObjectCode,
        reply: Reply<Option<Renaming>>,
    },
    SetObjectVersionValue {
        renaming: Renaming,
        value: ObjectValue,
    },
    NewVersionSameValue {
        read: Renaming,
        written: Renaming,
    },
    Barrier {
        app_id: AppId,
        reply: Reply<Result<()>>,
    },
    EndOfApp {
        app_id: AppId,
        reply: Reply<Result<()>>,
    },
    GetResultFiles {
        app_id: AppId,
        reply: Reply<Vec<OrderedResult>>,
    },
    UnblockResultFiles {
        data_ids: Vec<DataId>,
    },
    WaitForDataReadyToDelete {
        location: DataLocation,
        reply: Reply<()>,
    },
    DeleteFile {
        location: DataLocation,
        reply: Reply<()>,
    },
    DeleteObject {
        code: ObjectCode,
    },
    TasksState {
        reply: Reply<TaskStateReport>,
    },
    GraphDot {
        reply: Reply<String>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Request {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::TaskAnalysis { .. } => "task_analysis",
            Self::TaskEnd(_) => "task_end",
            Self::RegisterDataAccess { .. } => "register_data_access",
            Self::AlreadyAccessed { .. } => "already_accessed",
            Self::WaitForTask { .. } => "wait_for_task",
            Self::TransferOpenFile { .. } => "transfer_open_file",
            Self::TransferObject { .. } => "transfer_object",
            Self::DataAccessed { .. } => "data_accessed",
            Self::RegisterLocation { .. } => "register_location",
            Self::FinishFileAccess { .. } => "finish_file_access",
            Self::IsObjectHere { .. } => "is_object_here",
            Self::GetLastRenaming { .. } => "get_last_renaming",
            Self::SetObjectVersionValue { .. } => "set_object_version_value",
            Self::NewVersionSameValue { .. } => "new_version_same_value",
            Self::Barrier { .. } => "barrier",
            Self::EndOfApp { .. } => "end_of_app",
            Self::GetResultFiles { .. } => "get_result_files",
            Self::UnblockResultFiles { .. } => "unblock_result_files",
            Self::WaitForDataReadyToDelete { .. } => "wait_for_data_ready_to_delete",
            Self::DeleteFile { .. } => "delete_file",
            Self::DeleteObject { .. } => "delete_object",
            Self::TasksState { .. } => "tasks_state",
            Self::GraphDot { .. } => "graph_dot",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}
