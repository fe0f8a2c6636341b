//! The child-side program that resolves and invokes one callable.
//!
//! The shim reads its request from `WRAP_REQUEST_PATH`, prints nothing of
//! its own on stdout, and writes exactly one envelope to
//! `WRAP_RESULT_PATH` through a `.partial` file and an atomic rename.

/// Python source run with `python -c`.
pub const CHILD_SHIM: &str = r#"
import base64
import dataclasses
import datetime
import decimal
import enum
import importlib
import inspect
import json
import math
import os
import pathlib
import signal
import sys
import time
import traceback
import types
import typing

RESULT_ENV = "WRAP_RESULT_PATH"
REQUEST_ENV = "WRAP_REQUEST_PATH"


class Cancelled(BaseException):
    pass


def on_sigterm(signum, frame):
    raise Cancelled()


def write_envelope(envelope):
    path = os.environ.get(RESULT_ENV)
    if not path:
        return
    partial = path + ".partial"
    with open(partial, "w", encoding="utf-8") as handle:
        json.dump(envelope, handle, allow_nan=False)
        handle.flush()
        os.fsync(handle.fileno())
    os.replace(partial, path)


def resolve_target(request):
    obj = importlib.import_module(request["module_import_path"])
    for part in request.get("qualname", "").split("."):
        if part:
            obj = getattr(obj, part)
    return obj


def strip_wrappers(annotation):
    while True:
        origin = typing.get_origin(annotation)
        if origin is typing.Annotated:
            annotation = typing.get_args(annotation)[0]
            continue
        union_type = getattr(types, "UnionType", None)
        if origin is typing.Union or (union_type is not None and origin is union_type):
            members = [a for a in typing.get_args(annotation) if a is not type(None)]
            if len(members) == 1:
                annotation = members[0]
                continue
        return annotation


def coerce_enum(enum_cls, value):
    if isinstance(value, enum_cls):
        return value
    try:
        return enum_cls(value)
    except ValueError:
        pass
    if isinstance(value, str):
        if value in enum_cls.__members__:
            return enum_cls[value]
        for member in enum_cls:
            if str(member.value) == value:
                return member
    raise ValueError("%r is not a valid %s" % (value, enum_cls.__name__))


def coerce(value, annotation):
    if value is None or annotation is inspect.Parameter.empty:
        return value
    annotation = strip_wrappers(annotation)
    origin = typing.get_origin(annotation)
    if origin in (list, tuple, set, frozenset) and isinstance(value, list):
        args = typing.get_args(annotation)
        if origin is not tuple and len(args) == 1:
            value = [coerce(item, args[0]) for item in value]
        return value if origin is list else origin(value)
    if not isinstance(annotation, type):
        return value
    if issubclass(annotation, enum.Enum):
        return coerce_enum(annotation, value)
    if issubclass(annotation, pathlib.PurePath) and isinstance(value, str):
        return annotation(value)
    if annotation is datetime.datetime and isinstance(value, str):
        return datetime.datetime.fromisoformat(value)
    if annotation is datetime.date and isinstance(value, str):
        return datetime.date.fromisoformat(value)
    if annotation is datetime.time and isinstance(value, str):
        return datetime.time.fromisoformat(value)
    if annotation is decimal.Decimal and not isinstance(value, bool):
        return decimal.Decimal(str(value))
    if annotation is float and isinstance(value, int) and not isinstance(value, bool):
        return float(value)
    if annotation in (tuple, set, frozenset) and isinstance(value, list):
        return annotation(value)
    if annotation is bytes and isinstance(value, str):
        return value.encode("utf-8")
    if dataclasses.is_dataclass(annotation) and isinstance(value, dict):
        return annotation(**value)
    return value


def bind_arguments(target, args, kwargs):
    try:
        signature = inspect.signature(target)
    except (TypeError, ValueError):
        return list(args), dict(kwargs)
    try:
        hints = typing.get_type_hints(target, include_extras=True)
    except Exception:
        hints = {}
    params = list(signature.parameters.values())
    positional = [
        p for p in params
        if p.kind in (inspect.Parameter.POSITIONAL_ONLY, inspect.Parameter.POSITIONAL_OR_KEYWORD)
    ]
    var_positional = next(
        (p for p in params if p.kind == inspect.Parameter.VAR_POSITIONAL), None
    )

    def annotation_of(param):
        if param is None:
            return inspect.Parameter.empty
        return hints.get(param.name, param.annotation)

    bound_args = []
    for index, value in enumerate(args):
        param = positional[index] if index < len(positional) else var_positional
        bound_args.append(coerce(value, annotation_of(param)))
    bound_kwargs = {}
    for name, value in kwargs.items():
        bound_kwargs[name] = coerce(value, annotation_of(signature.parameters.get(name)))
    return bound_args, bound_kwargs


def settle(result):
    if inspect.isawaitable(result):
        import asyncio

        async def wait_for(awaitable):
            return await awaitable

        return asyncio.run(wait_for(result))
    return result


def invoke(target, request):
    mode = request.get("call_mode", "call")
    argv = [str(item) for item in request.get("argv") or []]
    prog = request.get("prog_name") or request.get("qualname") or "action"
    if mode == "call":
        args, kwargs = bind_arguments(
            target, request.get("args") or [], request.get("kwargs") or {}
        )
        return settle(target(*args, **kwargs))
    if mode == "click_main":
        return target.main(args=argv, prog_name=prog, standalone_mode=False)
    if mode == "typer_main":
        import typer

        app = typer.Typer(add_completion=False)
        app.command()(target)
        return app(args=argv, prog_name=prog, standalone_mode=False)
    main = getattr(target, "main", None)
    if callable(main) and hasattr(target, "params"):
        return main(args=argv, prog_name=prog, standalone_mode=True)
    sys.argv = [prog] + argv
    return settle(target())


def json_fallback(value):
    if isinstance(value, (datetime.date, datetime.time)):
        return value.isoformat()
    if isinstance(value, (pathlib.PurePath, decimal.Decimal)):
        return str(value)
    if isinstance(value, enum.Enum):
        return value.value
    if isinstance(value, (set, frozenset, tuple)):
        return list(value)
    if dataclasses.is_dataclass(value) and not isinstance(value, type):
        return dataclasses.asdict(value)
    raise TypeError("not serializable: %s" % type(value).__name__)


def is_table(data):
    return isinstance(data, list) and len(data) > 0 and all(isinstance(row, dict) for row in data)


def serialize(value):
    if value is None:
        return "none", None
    if isinstance(value, str):
        return "text", value
    if isinstance(value, (bytes, bytearray)):
        data = bytes(value)
        return "file", {
            "encoding": "base64",
            "data": base64.b64encode(data).decode("ascii"),
            "size": len(data),
        }
    if isinstance(value, pathlib.PurePath):
        return "file", {"path": str(value)}
    if isinstance(value, float) and not math.isfinite(value):
        return "repr", repr(value)
    if isinstance(value, (bool, int, float)):
        return "json", value
    if isinstance(value, (datetime.date, datetime.time)):
        return "text", value.isoformat()
    if isinstance(value, decimal.Decimal):
        return "text", str(value)
    if isinstance(value, enum.Enum):
        return serialize(value.value)
    if dataclasses.is_dataclass(value) and not isinstance(value, type):
        value = dataclasses.asdict(value)
    if isinstance(value, (dict, list, tuple, set, frozenset)):
        data = list(value) if isinstance(value, (set, frozenset, tuple)) else value
        try:
            encoded = json.loads(json.dumps(data, default=json_fallback, allow_nan=False))
        except (TypeError, ValueError):
            return "repr", repr(value)
        return ("table" if is_table(encoded) else "json"), encoded
    return "repr", repr(value)


def exit_code_of(exc):
    code = exc.code
    if code is None:
        return 0
    if isinstance(code, int):
        return code
    print(code, file=sys.stderr)
    return 1


def error_info(kind, message, trace):
    info = {"type": kind, "message": message}
    if trace:
        info["traceback"] = trace
    return info


def main():
    started = time.monotonic()
    envelope = {
        "ok": False,
        "cancelled": False,
        "timed_out": False,
        "exit_code": None,
        "result_kind": "none",
        "payload": None,
        "error": None,
    }
    try:
        signal.signal(signal.SIGTERM, on_sigterm)
    except (ValueError, OSError, AttributeError):
        pass
    try:
        with open(os.environ[REQUEST_ENV], "r", encoding="utf-8") as handle:
            request = json.load(handle)
        os.environ.update(request.get("env_overrides") or {})
        if request.get("working_dir"):
            os.chdir(request["working_dir"])
        for entry in reversed(request.get("sys_path") or []):
            if entry not in sys.path:
                sys.path.insert(0, entry)
        target = resolve_target(request)
        kind, payload = serialize(invoke(target, request))
        envelope.update(ok=True, exit_code=0, result_kind=kind, payload=payload)
    except Cancelled:
        envelope.update(cancelled=True, error=error_info("Cancelled", "Cancelled by request", None))
    except SystemExit as exc:
        code = exit_code_of(exc)
        if code == 0:
            envelope.update(ok=True, exit_code=0)
        else:
            envelope.update(
                exit_code=code,
                error=error_info("SystemExit", "Exited with status %s" % code, None),
            )
    except BaseException as exc:
        envelope.update(
            exit_code=1,
            error=error_info(type(exc).__name__, str(exc), traceback.format_exc()),
        )
    envelope["duration_ms"] = int((time.monotonic() - started) * 1000)
    try:
        write_envelope(envelope)
    except BaseException:
        traceback.print_exc()
    sys.stdout.flush()
    sys.stderr.flush()
    if envelope["cancelled"]:
        os._exit(143)
    sys.exit(0 if envelope["ok"] else (envelope["exit_code"] or 1))


main()
"#;

/// Arguments that run [`CHILD_SHIM`] under an interpreter.
pub fn shim_args() -> Vec<String> {
    vec!["-c".to_string(), CHILD_SHIM.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::protocol::{REQUEST_PATH_ENV, RESULT_PATH_ENV};

    #[test]
    fn test_shim_reads_the_environment_contract() {
        assert!(CHILD_SHIM.contains(&format!("\"{RESULT_PATH_ENV}\"")));
        assert!(CHILD_SHIM.contains(&format!("\"{REQUEST_PATH_ENV}\"")));
        assert_eq!(shim_args()[0], "-c");
    }
}
